use async_trait::async_trait;
use migration_catalog::{Catalog, ProviderTag};
use sqlx::{AnyConnection, Connection};
use tracing::warn;

use super::{redact, sqlx_common, BranchConnection, ProviderStrategy, StrategyError};

pub struct SqliteStrategy;

impl SqliteStrategy {
    fn require_any(conn: &mut BranchConnection) -> Result<&mut AnyConnection, StrategyError> {
        match conn {
            BranchConnection::Any(c) => Ok(c),
            BranchConnection::Mssql(_) => Err(StrategyError::WrongConnectionKind),
        }
    }
}

#[async_trait]
impl ProviderStrategy for SqliteStrategy {
    fn provider(&self) -> ProviderTag {
        ProviderTag::Sqlite
    }

    async fn can_connect(&self, conn_str: &str) -> bool {
        match AnyConnection::connect(conn_str).await {
            Ok(mut c) => {
                let _ = c.close().await;
                true
            }
            Err(err) => {
                warn!(conn_str = %redact::redact(conn_str), error = %err, "sqlite can_connect failed");
                false
            }
        }
    }

    async fn ensure_database(&self, conn_str: &str) -> Result<bool, StrategyError> {
        // Connecting with `?mode=rwc` (the descriptor's responsibility to
        // include) creates the file if it does not exist; there is nothing
        // further to materialize here. We report "already existed" by
        // checking ahead of the connect.
        let path = conn_str
            .trim_start_matches("sqlite://")
            .split('?')
            .next()
            .unwrap_or("");
        let existed = path == ":memory:" || std::path::Path::new(path).exists();
        let mut conn = AnyConnection::connect(conn_str).await?;
        conn.close().await?;
        Ok(existed)
    }

    async fn open(&self, conn_str: &str) -> Result<BranchConnection, StrategyError> {
        Ok(BranchConnection::Any(AnyConnection::connect(conn_str).await?))
    }

    async fn applied_ids(&self, conn: &mut BranchConnection) -> Result<Vec<String>, StrategyError> {
        sqlx_common::applied_ids(Self::require_any(conn)?, self.provider()).await
    }

    async fn apply_forward(
        &self,
        conn: &mut BranchConnection,
        target_id: Option<&str>,
        catalog: &Catalog,
    ) -> Result<(), StrategyError> {
        sqlx_common::apply_forward(Self::require_any(conn)?, self.provider(), target_id, catalog).await
    }

    async fn apply_reverse(
        &self,
        conn: &mut BranchConnection,
        target_id: &str,
        catalog: &Catalog,
    ) -> Result<(), StrategyError> {
        sqlx_common::apply_reverse(Self::require_any(conn)?, self.provider(), target_id, catalog).await
    }

    async fn validate_schema(&self, conn: &mut BranchConnection) -> bool {
        match Self::require_any(conn) {
            Ok(c) => sqlx_common::validate_schema(c, self.provider()).await,
            Err(_) => false,
        }
    }

    fn quote_ident(&self, name: &str) -> String {
        sqlx_common::quote_ident(self.provider(), name)
    }
}
