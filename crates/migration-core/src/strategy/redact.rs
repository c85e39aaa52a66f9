//! Connection descriptor redaction. Every log site that might receive a
//! connection descriptor routes through [`redact`] first.

use regex::Regex;
use std::sync::LazyLock;

static SECRET_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(password|pwd)=([^;&\s]*)").expect("static redaction regex is valid")
});

/// Replaces the value half of any `password=...` / `pwd=...` pair
/// (case-insensitive key match) with `***`. Connection strings that use
/// other key spellings for secrets are out of scope; authors are expected
/// to name secrets `password` or `pwd`.
pub fn redact(conn_str: &str) -> String {
    SECRET_PAIR.replace_all(conn_str, "$1=***").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_password_case_insensitively() {
        let input = "Server=tcp:host;Database=db;PASSWORD=hunter2;Encrypt=true";
        let redacted = redact(input);
        assert!(redacted.contains("PASSWORD=***"));
        assert!(!redacted.contains("hunter2"));
    }

    #[test]
    fn redacts_pwd_alias() {
        let input = "uid=admin;pwd=swordfish";
        assert_eq!(redact(input), "uid=admin;pwd=***");
    }

    #[test]
    fn leaves_non_secret_fields_untouched() {
        let input = "host=localhost;port=5432;dbname=pos";
        assert_eq!(redact(input), input);
    }
}
