//! Engine configuration loaded from environment variables, following the
//! same pattern the rest of this codebase uses: no `config` crate, just
//! `std::env::var` with documented defaults.

use std::fmt;

/// Head-office engine configuration.
///
/// # Environment Variables
///
/// - `MIGRATOR_STATE_STORE_URL`: connection string for the head-office
///   state store. Default: `sqlite://migrator-state.db?mode=rwc`
/// - `MIGRATOR_RECONCILER_ENABLED`: `true`/`false`. Default: `true`
/// - `MIGRATOR_LOG_LEVEL`: tracing filter directive. Default: `info`
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub state_store_url: String,
    pub reconciler_enabled: bool,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_store_url: "sqlite://migrator-state.db?mode=rwc".to_string(),
            reconciler_enabled: true,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let state_store_url = std::env::var("MIGRATOR_STATE_STORE_URL")
            .unwrap_or_else(|_| "sqlite://migrator-state.db?mode=rwc".to_string());

        let reconciler_enabled = std::env::var("MIGRATOR_RECONCILER_ENABLED")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(true);

        let log_level = std::env::var("MIGRATOR_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Self {
            state_store_url,
            reconciler_enabled,
            log_level,
        }
    }

    pub fn log_config(&self) {
        tracing::info!(
            reconciler_enabled = self.reconciler_enabled,
            log_level = %self.log_level,
            "engine configuration loaded"
        );
    }
}

impl fmt::Display for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EngineConfig {{ reconciler_enabled: {}, log_level: {} }}",
            self.reconciler_enabled, self.log_level
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_reconciler() {
        let cfg = EngineConfig::default();
        assert!(cfg.reconciler_enabled);
        assert_eq!(cfg.log_level, "info");
    }
}
