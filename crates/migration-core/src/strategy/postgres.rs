use async_trait::async_trait;
use migration_catalog::{Catalog, ProviderTag};
use sqlx::{AnyConnection, Connection};
use tracing::warn;

use super::{redact, sqlx_common, BranchConnection, ProviderStrategy, StrategyError};

pub struct PostgresStrategy;

impl PostgresStrategy {
    fn require_any(conn: &mut BranchConnection) -> Result<&mut AnyConnection, StrategyError> {
        match conn {
            BranchConnection::Any(c) => Ok(c),
            BranchConnection::Mssql(_) => Err(StrategyError::WrongConnectionKind),
        }
    }
}

#[async_trait]
impl ProviderStrategy for PostgresStrategy {
    fn provider(&self) -> ProviderTag {
        ProviderTag::PostgreSql
    }

    async fn can_connect(&self, conn_str: &str) -> bool {
        match AnyConnection::connect(conn_str).await {
            Ok(mut c) => {
                let _ = c.close().await;
                true
            }
            Err(err) => {
                warn!(conn_str = %redact::redact(conn_str), error = %err, "postgres can_connect failed");
                false
            }
        }
    }

    async fn ensure_database(&self, _conn_str: &str) -> Result<bool, StrategyError> {
        // Network backend: the core never attempts to create a database that
        // doesn't already exist. It is assumed provisioned out of band.
        Ok(true)
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
