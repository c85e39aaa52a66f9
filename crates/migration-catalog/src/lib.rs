//! The migration catalog: an append-only, totally ordered set of schema
//! migration units for the branch point-of-sale schema.
//!
//! The catalog is produced out-of-band (by whoever authors a new migration)
//! and is read-only to the rest of the engine. It exposes forward (`up`) and
//! reverse (`down`) transforms per unit, plus the handful of function
//! symbols the core relies on: [`Catalog::all_ids`], [`Catalog::apply`],
//! [`Catalog::revert`] and [`Catalog::product_version`].
//!
//! Units operate on [`sqlx::AnyConnection`], which is backed by SQLite,
//! PostgreSQL or MySQL depending on which branch is being migrated. SQL
//! Server has no `sqlx` driver and is deliberately excluded from this type:
//! the SQL Server strategy never calls into the catalog's incremental
//! applier and instead materializes the target schema in one shot (see the
//! `migration-core` crate's `strategy::mssql` module).

pub mod pos_schema;

use futures::future::BoxFuture;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The relational backend a branch database lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderTag {
    Sqlite,
    SqlServer,
    MySql,
    PostgreSql,
}

impl ProviderTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderTag::Sqlite => "sqlite",
            ProviderTag::SqlServer => "sqlserver",
            ProviderTag::MySql => "mysql",
            ProviderTag::PostgreSql => "postgresql",
        }
    }
}

impl fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderTag {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(ProviderTag::Sqlite),
            "sqlserver" | "mssql" => Ok(ProviderTag::SqlServer),
            "mysql" | "mariadb" => Ok(ProviderTag::MySql),
            "postgresql" | "postgres" | "pg" => Ok(ProviderTag::PostgreSql),
            other => Err(CatalogError::UnsupportedProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown migration id `{0}`")]
    UnknownId(String),
    #[error("migration `{0}` has no reverse transform")]
    NotReversible(String),
    #[error("provider `{0}` is not supported")]
    UnsupportedProvider(String),
    #[error("migration execution failed: {0}")]
    ExecutionFailed(#[from] sqlx::Error),
}

type UnitResult<'c> = BoxFuture<'c, Result<(), CatalogError>>;

/// Signature shared by every migration unit's `up` and `down` transform.
///
/// Plain `fn` rather than a boxed closure: units are authored as free
/// functions and the catalog is a static table of function pointers, not a
/// place for runtime-constructed behavior.
pub type UnitFn = for<'c> fn(&'c mut sqlx::AnyConnection, ProviderTag) -> UnitResult<'c>;

/// A single, atomic forward/reverse schema change.
///
/// `id` is a lexicographically ordered, timestamp-prefixed string; the
/// catalog's total order is exactly the lexicographic order of `id`.
pub struct MigrationUnit {
    pub id: &'static str,
    pub description: &'static str,
    up: UnitFn,
    down: Option<UnitFn>,
}

impl MigrationUnit {
    pub fn new(id: &'static str, description: &'static str, up: UnitFn) -> Self {
        Self {
            id,
            description,
            up,
            down: None,
        }
    }

    #[must_use]
    pub fn reversible(mut self, down: UnitFn) -> Self {
        self.down = Some(down);
        self
    }

    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }
}

/// The append-only, totally ordered catalog consumed by the migration core.
pub struct Catalog {
    units: Vec<MigrationUnit>,
}

impl Catalog {
    pub fn new(mut units: Vec<MigrationUnit>) -> Self {
        units.sort_by(|a, b| a.id.cmp(b.id));
        Self { units }
    }

    /// The catalog shipped with this build: the branch point-of-sale schema.
    pub fn pos() -> Self {
        Self::new(pos_schema::all())
    }

    pub fn all_ids(&self) -> Vec<&'static str> {
        self.units.iter().map(|u| u.id).collect()
    }

    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    pub fn unit(&self, id: &str) -> Option<&MigrationUnit> {
        self.units.iter().find(|u| u.id == id)
    }

    /// The greatest id in the catalog, i.e. its head.
    pub fn head(&self) -> Option<&'static str> {
        self.units.last().map(|u| u.id)
    }

    /// Global tag written into each history row.
    pub fn product_version(&self) -> &'static str {
        pos_schema::PRODUCT_VERSION
    }

    pub async fn apply(
        &self,
        id: &str,
        conn: &mut sqlx::AnyConnection,
        provider: ProviderTag,
    ) -> Result<(), CatalogError> {
        let unit = self
            .unit(id)
            .ok_or_else(|| CatalogError::UnknownId(id.to_string()))?;
        (unit.up)(conn, provider).await
    }

    pub async fn revert(
        &self,
        id: &str,
        conn: &mut sqlx::AnyConnection,
        provider: ProviderTag,
    ) -> Result<(), CatalogError> {
        let unit = self
            .unit(id)
            .ok_or_else(|| CatalogError::UnknownId(id.to_string()))?;
        let down = unit
            .down
            .ok_or_else(|| CatalogError::NotReversible(id.to_string()))?;
        down(conn, provider).await
    }
}

/// Tables required by the *initial* forward transform, used by the
/// integrity probe. Tables added by later units must never be listed here:
/// a rollback that removes them must still validate.
pub const CORE_TABLES: &[&str] = &["products", "sales", "sale_items", "payments"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_sorted_by_id() {
        let catalog = Catalog::pos();
        let ids = catalog.all_ids();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn head_is_last_lexicographic_id() {
        let catalog = Catalog::pos();
        assert_eq!(catalog.head(), catalog.all_ids().last().copied());
    }

    #[test]
    fn provider_tag_roundtrips_through_str() {
        for tag in [
            ProviderTag::Sqlite,
            ProviderTag::SqlServer,
            ProviderTag::MySql,
            ProviderTag::PostgreSql,
        ] {
            let parsed: ProviderTag = tag.as_str().parse().unwrap();
            assert_eq!(parsed.as_str(), tag.as_str());
        }
    }

    #[test]
    fn unknown_provider_is_rejected() {
        assert!("oracle".parse::<ProviderTag>().is_err());
    }
}
