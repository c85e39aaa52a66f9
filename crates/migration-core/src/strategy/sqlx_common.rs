//! Shared helpers for the three `sqlx::Any`-backed strategies: history table
//! management, the incremental applier, identifier quoting and the
//! integrity probe. Each concrete strategy (`sqlite`, `postgres`, `mysql`)
//! only supplies `can_connect` / `ensure_database` / `open` / `quote_ident`
//! and otherwise delegates here.

use migration_catalog::{Catalog, ProviderTag, CORE_TABLES};
use sqlx::Row;

use super::StrategyError;

pub const HISTORY_TABLE: &str = "_migration_history";

pub fn quote_ident(provider: ProviderTag, name: &str) -> String {
    match provider {
        ProviderTag::PostgreSql | ProviderTag::Sqlite => format!("\"{name}\""),
        ProviderTag::MySql => format!("`{name}`"),
        ProviderTag::SqlServer => format!("[{name}]"),
    }
}

pub async fn ensure_history_table(
    conn: &mut sqlx::AnyConnection,
    provider: ProviderTag,
) -> Result<(), StrategyError> {
    let table = quote_ident(provider, HISTORY_TABLE);
    let migration_id_ty = match provider {
        ProviderTag::MySql => "VARCHAR(150)",
        _ => "VARCHAR(150)",
    };
    let product_version_ty = match provider {
        ProviderTag::MySql => "VARCHAR(32)",
        _ => "VARCHAR(32)",
    };
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {table} ( \
             migration_id {migration_id_ty} PRIMARY KEY, \
             product_version {product_version_ty} NOT NULL \
         )"
    ))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn applied_ids(
    conn: &mut sqlx::AnyConnection,
    provider: ProviderTag,
) -> Result<Vec<String>, StrategyError> {
    let table = quote_ident(provider, HISTORY_TABLE);
    let exists = match provider {
        ProviderTag::Sqlite => {
            let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
                .bind(HISTORY_TABLE)
                .fetch_all(&mut *conn)
                .await?;
            !rows.is_empty()
        }
        ProviderTag::PostgreSql | ProviderTag::MySql => {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
            )
            .bind(HISTORY_TABLE)
            .fetch_one(&mut *conn)
            .await?;
            count > 0
        }
        ProviderTag::SqlServer => unreachable!("mssql never goes through sqlx_common"),
    };

    if !exists {
        // Fresh database: an absent history table is not a failure, it is
        // simply the empty set of applied ids.
        return Ok(Vec::new());
    }

    let rows = sqlx::query(&format!("SELECT migration_id FROM {table} ORDER BY migration_id ASC"))
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter()
        .map(|row| row.try_get::<String, _>("migration_id").map_err(StrategyError::from))
        .collect()
}

/// Runs every pending unit up to and including `target_id` (or all pending
/// units if `target_id` is `None`), in catalog order, recording each one in
/// the history table as it commits.
pub async fn apply_forward(
    conn: &mut sqlx::AnyConnection,
    provider: ProviderTag,
    target_id: Option<&str>,
    catalog: &Catalog,
) -> Result<(), StrategyError> {
    ensure_history_table(conn, provider).await?;
    let applied = applied_ids(conn, provider).await?;
    let table = quote_ident(provider, HISTORY_TABLE);
    let product_version = catalog.product_version();

    for id in catalog.all_ids() {
        if applied.iter().any(|a| a == id) {
            continue;
        }
        catalog.apply(id, conn, provider).await?;
        sqlx::query(&format!(
            "INSERT INTO {table} (migration_id, product_version) VALUES (?, ?)"
        ))
        .bind(id)
        .bind(product_version)
        .execute(&mut *conn)
        .await?;

        if target_id == Some(id) {
            break;
        }
    }
    Ok(())
}

/// Reverts every applied unit strictly after `target_id` (or everything, if
/// `target_id` is empty), from the tail backward.
pub async fn apply_reverse(
    conn: &mut sqlx::AnyConnection,
    provider: ProviderTag,
    target_id: &str,
    catalog: &Catalog,
) -> Result<(), StrategyError> {
    let table = quote_ident(provider, HISTORY_TABLE);
    let mut applied = applied_ids(conn, provider).await?;
    applied.sort();

    while let Some(id) = applied.pop() {
        if id == target_id {
            break;
        }
        catalog.revert(&id, conn, provider).await?;
        sqlx::query(&format!("DELETE FROM {table} WHERE migration_id = ?"))
            .bind(&id)
            .execute(&mut *conn)
            .await?;
        if target_id.is_empty() && applied.is_empty() {
            break;
        }
    }
    Ok(())
}

/// The integrity probe: confirms every core table (the initial transform's
/// tables, plus the history table) is present. Tables added by later units
/// are deliberately excluded so a rollback that drops them still validates.
pub async fn validate_schema(conn: &mut sqlx::AnyConnection, provider: ProviderTag) -> bool {
    let present = match table_names(conn, provider).await {
        Ok(names) => names,
        Err(_) => return false,
    };
    let mut required: Vec<&str> = CORE_TABLES.to_vec();
    required.push(HISTORY_TABLE);
    required.iter().all(|t| present.iter().any(|p| p == t))
}

async fn table_names(
    conn: &mut sqlx::AnyConnection,
    provider: ProviderTag,
) -> Result<Vec<String>, StrategyError> {
    let rows = match provider {
        ProviderTag::Sqlite => {
            sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
                .fetch_all(&mut *conn)
                .await?
        }
        ProviderTag::PostgreSql | ProviderTag::MySql => {
            sqlx::query("SELECT table_name AS name FROM information_schema.tables")
                .fetch_all(&mut *conn)
                .await?
        }
        ProviderTag::SqlServer => unreachable!("mssql never goes through sqlx_common"),
    };
    rows.into_iter()
        .map(|row| row.try_get::<String, _>("name").map_err(StrategyError::from))
        .collect()
}
