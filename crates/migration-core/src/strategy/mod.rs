//! Provider Strategy: one implementation per backend behind a single
//! interface. Three of the four (SQLite, PostgreSQL, MySQL) share a
//! connection type (`sqlx::AnyConnection`) and the incremental applier in
//! `sqlx_common`; SQL Server has no `sqlx` driver and is handled entirely
//! separately through `tiberius` in `mssql`, which is also what makes it
//! impossible for the SQL Server path to accidentally call into the
//! catalog's incremental applier — the catalog's `UnitFn` simply doesn't
//! accept a `tiberius::Client`.

mod mssql;
mod mysql;
mod postgres;
pub mod redact;
mod select;
mod sqlite;
mod sqlx_common;

pub use select::StrategySelector;

use async_trait::async_trait;
use migration_catalog::{Catalog, ProviderTag};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("catalog error: {0}")]
    Catalog(#[from] migration_catalog::CatalogError),
    #[error("connection failure: {0}")]
    Connection(#[from] sqlx::Error),
    #[error("sql server error: {0}")]
    Mssql(#[from] tiberius::error::Error),
    #[error("unexpected connection kind for this strategy")]
    WrongConnectionKind,
    #[error("{0}")]
    Other(String),
}

/// The live handle passed to every strategy operation. A strategy only ever
/// matches the variant it opened; any other variant reaching it would be a
/// selector bug, so those arms return `WrongConnectionKind` rather than
/// panicking.
pub enum BranchConnection {
    Any(sqlx::AnyConnection),
    Mssql(Box<tiberius::Client<tokio_util::compat::Compat<tokio::net::TcpStream>>>),
}

#[async_trait]
pub trait ProviderStrategy: Send + Sync {
    fn provider(&self) -> ProviderTag;

    /// Never throws; failures are logged (redacted) and folded into `false`.
    async fn can_connect(&self, conn_str: &str) -> bool;

    /// For file-backed providers, creates the database file if missing.
    /// For network providers, this is a no-op: the core never attempts to
    /// create a network database. Returns whether the database already
    /// existed.
    async fn ensure_database(&self, conn_str: &str) -> Result<bool, StrategyError>;

    async fn open(&self, conn_str: &str) -> Result<BranchConnection, StrategyError>;

    async fn applied_ids(&self, conn: &mut BranchConnection) -> Result<Vec<String>, StrategyError>;

    async fn pending_ids(
        &self,
        conn: &mut BranchConnection,
        catalog: &Catalog,
    ) -> Result<Vec<String>, StrategyError> {
        let applied = self.applied_ids(conn).await?;
        Ok(catalog
            .all_ids()
            .into_iter()
            .filter(|id| !applied.iter().any(|a| a.as_str() == *id))
            .map(str::to_string)
            .collect())
    }

    async fn apply_forward(
        &self,
        conn: &mut BranchConnection,
        target_id: Option<&str>,
        catalog: &Catalog,
    ) -> Result<(), StrategyError>;

    async fn apply_reverse(
        &self,
        conn: &mut BranchConnection,
        target_id: &str,
        catalog: &Catalog,
    ) -> Result<(), StrategyError>;

    /// Swallows errors and returns `false` on any query failure.
    async fn validate_schema(&self, conn: &mut BranchConnection) -> bool;

    fn quote_ident(&self, name: &str) -> String;
}
