//! The SQL Server strategy. SQL Server has no `sqlx` driver, so this module
//! talks to the server directly over `tiberius`, which also means it is
//! structurally incapable of calling into the catalog's incremental
//! applier: `migration_catalog::UnitFn` only accepts `&mut
//! sqlx::AnyConnection`. Instead this strategy always materializes the
//! target schema in one shot and synthesizes the history rows, whether the
//! branch is brand new or has some pending units left over from a catalog
//! update.

use std::sync::LazyLock;

use async_trait::async_trait;
use migration_catalog::{Catalog, ProviderTag, CORE_TABLES};
use regex::Regex;
use tiberius::{Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::warn;

use super::{redact, sqlx_common::HISTORY_TABLE, BranchConnection, ProviderStrategy, StrategyError};

type MssqlClient = Client<Compat<TcpStream>>;

static GO_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*GO\s*$").expect("static GO-batch regex is valid"));

/// Splits a generated script on client-side `GO` batch separators. SQL
/// Server's wire protocol has no notion of `GO`; it is purely a
/// client-side convention every tool that emits T-SQL scripts must honor.
fn split_batches(script: &str) -> Vec<&str> {
    GO_SEPARATOR
        .split(script)
        .map(str::trim)
        .filter(|batch| !batch.is_empty())
        .collect()
}

/// Mirrors the catalog's point-of-sale schema in SQL Server's dialect.
/// Every statement is guarded so the whole script can be re-run against a
/// partially bootstrapped database without error.
fn bootstrap_script() -> &'static str {
    r#"
IF NOT EXISTS (SELECT 1 FROM sys.Tables WHERE Name = N'products' AND Type = N'U')
CREATE TABLE products (
    id NVARCHAR(64) PRIMARY KEY,
    sku NVARCHAR(64) NOT NULL UNIQUE,
    name NVARCHAR(255) NOT NULL,
    price DECIMAL(10,2) NOT NULL,
    created_at DATETIME2 NOT NULL
)
GO
IF NOT EXISTS (SELECT 1 FROM sys.Tables WHERE Name = N'sales' AND Type = N'U')
CREATE TABLE sales (
    id NVARCHAR(64) PRIMARY KEY,
    branch_register NVARCHAR(64) NOT NULL,
    total_amount NVARCHAR(32) NOT NULL,
    created_at NVARCHAR(64) NOT NULL
)
GO
IF NOT EXISTS (SELECT 1 FROM sys.Tables WHERE Name = N'sale_items' AND Type = N'U')
CREATE TABLE sale_items (
    id NVARCHAR(64) PRIMARY KEY,
    sale_id NVARCHAR(64) NOT NULL REFERENCES sales(id),
    product_id NVARCHAR(64) NOT NULL REFERENCES products(id),
    quantity INT NOT NULL
)
GO
IF NOT EXISTS (SELECT 1 FROM sys.Tables WHERE Name = N'payments' AND Type = N'U')
CREATE TABLE payments (
    id NVARCHAR(64) PRIMARY KEY,
    sale_id NVARCHAR(64) NOT NULL REFERENCES sales(id),
    method NVARCHAR(32) NOT NULL,
    amount NVARCHAR(32) NOT NULL
)
GO
IF NOT EXISTS (SELECT 1 FROM sys.Tables WHERE Name = N'discount_codes' AND Type = N'U')
CREATE TABLE discount_codes (
    id NVARCHAR(64) PRIMARY KEY,
    code NVARCHAR(64) NOT NULL UNIQUE,
    percent_off INT NOT NULL
)
GO
IF COL_LENGTH('sales', 'notes') IS NULL
ALTER TABLE sales ADD notes NVARCHAR(MAX) NULL
GO
IF NOT EXISTS (SELECT 1 FROM sys.indexes WHERE name = 'idx_sale_items_sale_id' AND object_id = OBJECT_ID('sale_items'))
CREATE INDEX idx_sale_items_sale_id ON sale_items(sale_id)
GO
IF NOT EXISTS (SELECT 1 FROM sys.Tables WHERE Name = N'_migration_history' AND Type = N'U')
CREATE TABLE _migration_history (
    migration_id NVARCHAR(150) PRIMARY KEY,
    product_version NVARCHAR(32) NOT NULL
)
GO
"#
}

pub struct MssqlStrategy;

impl MssqlStrategy {
    fn require_mssql(conn: &mut BranchConnection) -> Result<&mut MssqlClient, StrategyError> {
        match conn {
            BranchConnection::Mssql(c) => Ok(c),
            BranchConnection::Any(_) => Err(StrategyError::WrongConnectionKind),
        }
    }

    async fn connect(conn_str: &str) -> Result<MssqlClient, StrategyError> {
        let config = Config::from_ado_string(conn_str)
            .map_err(|e| StrategyError::Other(format!("invalid connection descriptor: {e}")))?;
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| StrategyError::Other(e.to_string()))?;
        tcp.set_nodelay(true).ok();
        let client = Client::connect(config, tcp.compat_write()).await?;
        Ok(client)
    }

    async fn history_table_exists(client: &mut MssqlClient) -> Result<bool, StrategyError> {
        let rows = client
            .simple_query("SELECT 1 FROM sys.Tables WHERE Name = N'_migration_history' AND Type = N'U'")
            .await?
            .into_first_result()
            .await?;
        Ok(!rows.is_empty())
    }

    async fn applied_ids_inner(client: &mut MssqlClient) -> Result<Vec<String>, StrategyError> {
        if !Self::history_table_exists(client).await? {
            return Ok(Vec::new());
        }
        let rows = client
            .simple_query("SELECT migration_id FROM _migration_history ORDER BY migration_id ASC")
            .await?
            .into_first_result()
            .await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let id: &str = row.get("migration_id").unwrap_or_default();
            ids.push(id.to_string());
        }
        Ok(ids)
    }
}

#[async_trait]
impl ProviderStrategy for MssqlStrategy {
    fn provider(&self) -> ProviderTag {
        ProviderTag::SqlServer
    }

    async fn can_connect(&self, conn_str: &str) -> bool {
        match Self::connect(conn_str).await {
            Ok(_) => true,
            Err(err) => {
                warn!(conn_str = %redact::redact(conn_str), error = %err, "sql server can_connect failed");
                false
            }
        }
    }

    async fn ensure_database(&self, _conn_str: &str) -> Result<bool, StrategyError> {
        // Network backend: never attempt to create the database itself.
        Ok(true)
    }

    async fn open(&self, conn_str: &str) -> Result<BranchConnection, StrategyError> {
        Ok(BranchConnection::Mssql(Box::new(Self::connect(conn_str).await?)))
    }

    async fn applied_ids(&self, conn: &mut BranchConnection) -> Result<Vec<String>, StrategyError> {
        Self::applied_ids_inner(Self::require_mssql(conn)?).await
    }

    /// `target_id` is ignored: the bootstrap path always materializes the
    /// full target schema and synthesizes history for whatever is pending,
    /// per the fresh-bootstrap rule (no incremental replay on SQL Server).
    async fn apply_forward(
        &self,
        conn: &mut BranchConnection,
        _target_id: Option<&str>,
        catalog: &Catalog,
    ) -> Result<(), StrategyError> {
        let client = Self::require_mssql(conn)?;
        let applied = Self::applied_ids_inner(client).await?;
        let pending: Vec<&str> = catalog
            .all_ids()
            .into_iter()
            .filter(|id| !applied.iter().any(|a| a.as_str() == *id))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        for batch in split_batches(bootstrap_script()) {
            client.simple_query(batch).await?.into_results().await?;
        }

        let product_version = catalog.product_version();
        for id in pending {
            let stmt = format!(
                "IF NOT EXISTS (SELECT 1 FROM _migration_history WHERE migration_id = N'{id}') \
                 INSERT INTO _migration_history (migration_id, product_version) VALUES (N'{id}', N'{product_version}')"
            );
            client.simple_query(&stmt).await?.into_results().await?;
        }
        Ok(())
    }

    /// SQL Server's native migration tooling is lossy and the bootstrap path
    /// is one-shot and forward-only; the core never asks this strategy to
    /// reverse a unit, and a reconciler/operator driven rollback of a SQL
    /// Server branch is out of scope (manual intervention instead).
    async fn apply_reverse(
        &self,
        _conn: &mut BranchConnection,
        _target_id: &str,
        _catalog: &Catalog,
    ) -> Result<(), StrategyError> {
        Err(StrategyError::Other(
            "sql server strategy does not support reverse transforms".to_string(),
        ))
    }

    async fn validate_schema(&self, conn: &mut BranchConnection) -> bool {
        let client = match Self::require_mssql(conn) {
            Ok(c) => c,
            Err(_) => return false,
        };
        let stream = match client.simple_query("SELECT Name FROM sys.Tables WHERE Type = N'U'").await {
            Ok(stream) => stream,
            Err(_) => return false,
        };
        let rows = match stream.into_first_result().await {
            Ok(rows) => rows,
            Err(_) => return false,
        };
        let present: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get::<&str, _>("Name").map(str::to_string))
            .collect();
        let mut required: Vec<&str> = CORE_TABLES.to_vec();
        required.push(HISTORY_TABLE);
        required.iter().all(|t| present.iter().any(|p| p == t))
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("[{name}]")
    }
}
