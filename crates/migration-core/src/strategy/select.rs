//! Strategy Selector: a pure function of provider tag, process-wide.

use migration_catalog::ProviderTag;
use std::sync::Arc;

use super::{mssql::MssqlStrategy, mysql::MySqlStrategy, postgres::PostgresStrategy, sqlite::SqliteStrategy};
use super::{ProviderStrategy, StrategyError};

#[derive(Default, Clone)]
pub struct StrategySelector;

impl StrategySelector {
    pub fn new() -> Self {
        Self
    }

    pub fn select(&self, provider: ProviderTag) -> Result<Arc<dyn ProviderStrategy>, StrategyError> {
        match provider {
            ProviderTag::Sqlite => Ok(Arc::new(SqliteStrategy)),
            ProviderTag::PostgreSql => Ok(Arc::new(PostgresStrategy)),
            ProviderTag::MySql => Ok(Arc::new(MySqlStrategy)),
            ProviderTag::SqlServer => Ok(Arc::new(MssqlStrategy)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_matching_provider() {
        let selector = StrategySelector::new();
        for tag in [
            ProviderTag::Sqlite,
            ProviderTag::PostgreSql,
            ProviderTag::MySql,
            ProviderTag::SqlServer,
        ] {
            let strategy = selector.select(tag).unwrap();
            assert_eq!(strategy.provider(), tag);
        }
    }
}
