//! Migration units for the branch point-of-sale schema: `products`,
//! `sales`, `sale_items`, `payments`, plus the evolutions layered on top.
//!
//! Every id is a UTC-timestamp-prefixed string so the catalog's
//! lexicographic order matches authoring order. Identifiers are kept as
//! plain ASCII (`products`, `sale_id`, ...) so `quote_ident` in
//! `migration-core` never has to worry about reserved characters.

use crate::{CatalogError, MigrationUnit, ProviderTag};
use sqlx::Row;

pub const PRODUCT_VERSION: &str = "pos-schema-2026.1";

async fn exec(conn: &mut sqlx::AnyConnection, sql: &str) -> Result<(), CatalogError> {
    sqlx::query(sql).execute(&mut *conn).await?;
    Ok(())
}

async fn exec_all(conn: &mut sqlx::AnyConnection, statements: &[&str]) -> Result<(), CatalogError> {
    for stmt in statements {
        exec(conn, stmt).await?;
    }
    Ok(())
}

async fn column_exists(
    conn: &mut sqlx::AnyConnection,
    provider: ProviderTag,
    table: &str,
    column: &str,
) -> Result<bool, CatalogError> {
    match provider {
        ProviderTag::Sqlite => {
            let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
                .fetch_all(&mut *conn)
                .await?;
            Ok(rows
                .iter()
                .any(|row| row.get::<String, _>("name") == column))
        }
        ProviderTag::PostgreSql | ProviderTag::MySql => {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM information_schema.columns \
                 WHERE table_name = ? AND column_name = ?",
            )
            .bind(table)
            .bind(column)
            .fetch_one(&mut *conn)
            .await?;
            Ok(count > 0)
        }
        ProviderTag::SqlServer => unreachable!("catalog units never run against SQL Server"),
    }
}

async fn index_exists(
    conn: &mut sqlx::AnyConnection,
    provider: ProviderTag,
    table: &str,
    index: &str,
) -> Result<bool, CatalogError> {
    match provider {
        ProviderTag::Sqlite => {
            let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'index' AND name = ?")
                .bind(index)
                .fetch_all(&mut *conn)
                .await?;
            Ok(!rows.is_empty())
        }
        ProviderTag::PostgreSql => {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM pg_indexes WHERE tablename = $1 AND indexname = $2",
            )
            .bind(table)
            .bind(index)
            .fetch_one(&mut *conn)
            .await?;
            Ok(count > 0)
        }
        ProviderTag::MySql => {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM information_schema.statistics \
                 WHERE table_name = ? AND index_name = ?",
            )
            .bind(table)
            .bind(index)
            .fetch_one(&mut *conn)
            .await?;
            Ok(count > 0)
        }
        ProviderTag::SqlServer => unreachable!("catalog units never run against SQL Server"),
    }
}

fn price_type(provider: ProviderTag) -> &'static str {
    match provider {
        ProviderTag::Sqlite => "REAL",
        ProviderTag::PostgreSql => "NUMERIC(10,2)",
        ProviderTag::MySql => "DECIMAL(10,2)",
        ProviderTag::SqlServer => unreachable!("catalog units never run against SQL Server"),
    }
}

fn timestamp_type(provider: ProviderTag) -> &'static str {
    match provider {
        ProviderTag::Sqlite => "TEXT",
        ProviderTag::PostgreSql | ProviderTag::MySql => "TIMESTAMP",
        ProviderTag::SqlServer => unreachable!("catalog units never run against SQL Server"),
    }
}

// ---------------------------------------------------------------------
// 20240101000000_initial_schema
// ---------------------------------------------------------------------

fn up_initial_schema(
    conn: &mut sqlx::AnyConnection,
    provider: ProviderTag,
) -> crate::UnitResult<'_> {
    Box::pin(async move {
        let price = price_type(provider);
        let ts = timestamp_type(provider);
        exec_all(
            conn,
            &[
                &format!(
                    "CREATE TABLE IF NOT EXISTS products ( \
                         id TEXT PRIMARY KEY, \
                         sku TEXT NOT NULL UNIQUE, \
                         name TEXT NOT NULL, \
                         price {price} NOT NULL, \
                         created_at {ts} NOT NULL \
                     )"
                ),
                "CREATE TABLE IF NOT EXISTS sales ( \
                     id TEXT PRIMARY KEY, \
                     branch_register TEXT NOT NULL, \
                     total_amount TEXT NOT NULL, \
                     created_at TEXT NOT NULL \
                 )",
                "CREATE TABLE IF NOT EXISTS sale_items ( \
                     id TEXT PRIMARY KEY, \
                     sale_id TEXT NOT NULL, \
                     product_id TEXT NOT NULL, \
                     quantity INTEGER NOT NULL, \
                     FOREIGN KEY (sale_id) REFERENCES sales(id), \
                     FOREIGN KEY (product_id) REFERENCES products(id) \
                 )",
                "CREATE TABLE IF NOT EXISTS payments ( \
                     id TEXT PRIMARY KEY, \
                     sale_id TEXT NOT NULL, \
                     method TEXT NOT NULL, \
                     amount TEXT NOT NULL, \
                     FOREIGN KEY (sale_id) REFERENCES sales(id) \
                 )",
            ],
        )
        .await
    })
}

fn down_initial_schema(
    conn: &mut sqlx::AnyConnection,
    _provider: ProviderTag,
) -> crate::UnitResult<'_> {
    Box::pin(async move {
        exec_all(
            conn,
            &[
                "DROP TABLE IF EXISTS payments",
                "DROP TABLE IF EXISTS sale_items",
                "DROP TABLE IF EXISTS sales",
                "DROP TABLE IF EXISTS products",
            ],
        )
        .await
    })
}

// ---------------------------------------------------------------------
// 20240301000000_add_discount_codes
// ---------------------------------------------------------------------

fn up_add_discount_codes(
    conn: &mut sqlx::AnyConnection,
    _provider: ProviderTag,
) -> crate::UnitResult<'_> {
    Box::pin(async move {
        exec(
            conn,
            "CREATE TABLE IF NOT EXISTS discount_codes ( \
                 id TEXT PRIMARY KEY, \
                 code TEXT NOT NULL UNIQUE, \
                 percent_off INTEGER NOT NULL \
             )",
        )
        .await
    })
}

fn down_add_discount_codes(
    conn: &mut sqlx::AnyConnection,
    _provider: ProviderTag,
) -> crate::UnitResult<'_> {
    Box::pin(async move { exec(conn, "DROP TABLE IF EXISTS discount_codes").await })
}

// ---------------------------------------------------------------------
// 20240501000000_collapse_payment_method
//
// Data-destructive: collapses the four original payment methods into
// `cash` / `card`. The reverse transform is best-effort and declared lossy
// per the catalog's authoring rules: it can widen the column back but it
// cannot recover which card sub-type a collapsed row originally had, so it
// remaps every `card` row to `credit_card` as an unambiguous pre-image.
// ---------------------------------------------------------------------

fn up_collapse_payment_method(
    conn: &mut sqlx::AnyConnection,
    _provider: ProviderTag,
) -> crate::UnitResult<'_> {
    Box::pin(async move {
        exec(
            conn,
            "UPDATE payments SET method = 'card' \
             WHERE method IN ('credit_card', 'debit_card', 'gift_card')",
        )
        .await
    })
}

fn down_collapse_payment_method(
    conn: &mut sqlx::AnyConnection,
    _provider: ProviderTag,
) -> crate::UnitResult<'_> {
    Box::pin(async move {
        exec(
            conn,
            "UPDATE payments SET method = 'credit_card' WHERE method = 'card'",
        )
        .await
    })
}

// ---------------------------------------------------------------------
// 20240701000000_add_sales_index
// ---------------------------------------------------------------------

fn up_add_sales_index(
    conn: &mut sqlx::AnyConnection,
    provider: ProviderTag,
) -> crate::UnitResult<'_> {
    Box::pin(async move {
        match provider {
            ProviderTag::Sqlite | ProviderTag::PostgreSql => {
                exec(
                    conn,
                    "CREATE INDEX IF NOT EXISTS idx_sale_items_sale_id ON sale_items(sale_id)",
                )
                .await
            }
            ProviderTag::MySql => {
                // MySQL has no `CREATE INDEX IF NOT EXISTS`; guard manually so
                // a partially-applied prior attempt can be retried safely.
                if !index_exists(conn, provider, "sale_items", "idx_sale_items_sale_id").await? {
                    exec(
                        conn,
                        "CREATE INDEX idx_sale_items_sale_id ON sale_items(sale_id)",
                    )
                    .await?;
                }
                Ok(())
            }
            ProviderTag::SqlServer => unreachable!("catalog units never run against SQL Server"),
        }
    })
}

fn down_add_sales_index(
    conn: &mut sqlx::AnyConnection,
    provider: ProviderTag,
) -> crate::UnitResult<'_> {
    Box::pin(async move {
        match provider {
            ProviderTag::Sqlite | ProviderTag::PostgreSql => {
                exec(conn, "DROP INDEX IF EXISTS idx_sale_items_sale_id").await
            }
            ProviderTag::MySql => {
                if index_exists(conn, provider, "sale_items", "idx_sale_items_sale_id").await? {
                    exec(conn, "DROP INDEX idx_sale_items_sale_id ON sale_items").await?;
                }
                Ok(())
            }
            ProviderTag::SqlServer => unreachable!("catalog units never run against SQL Server"),
        }
    })
}

// ---------------------------------------------------------------------
// 20240815000000_add_sale_notes_column
//
// The reverse transform drops a column. On SQLite this uses the
// create-new / copy / drop-old / rename rebuild pattern rather than
// relying on `ALTER TABLE ... DROP COLUMN`, per the catalog's authoring
// rules, with foreign-key enforcement toggled off around the rebuild.
// ---------------------------------------------------------------------

fn up_add_sale_notes_column(
    conn: &mut sqlx::AnyConnection,
    provider: ProviderTag,
) -> crate::UnitResult<'_> {
    Box::pin(async move {
        if !column_exists(conn, provider, "sales", "notes").await? {
            exec(conn, "ALTER TABLE sales ADD COLUMN notes TEXT").await?;
        }
        Ok(())
    })
}

fn down_add_sale_notes_column(
    conn: &mut sqlx::AnyConnection,
    provider: ProviderTag,
) -> crate::UnitResult<'_> {
    Box::pin(async move {
        match provider {
            ProviderTag::Sqlite => {
                exec_all(
                    conn,
                    &[
                        "PRAGMA foreign_keys = OFF",
                        "CREATE TABLE sales_new ( \
                             id TEXT PRIMARY KEY, \
                             branch_register TEXT NOT NULL, \
                             total_amount TEXT NOT NULL, \
                             created_at TEXT NOT NULL \
                         )",
                        "INSERT INTO sales_new (id, branch_register, total_amount, created_at) \
                         SELECT id, branch_register, total_amount, created_at FROM sales",
                        "DROP TABLE sales",
                        "ALTER TABLE sales_new RENAME TO sales",
                        "CREATE INDEX IF NOT EXISTS idx_sale_items_sale_id ON sale_items(sale_id)",
                        "PRAGMA foreign_keys = ON",
                    ],
                )
                .await
            }
            ProviderTag::PostgreSql | ProviderTag::MySql => {
                if column_exists(conn, provider, "sales", "notes").await? {
                    exec(conn, "ALTER TABLE sales DROP COLUMN notes").await?;
                }
                Ok(())
            }
            ProviderTag::SqlServer => unreachable!("catalog units never run against SQL Server"),
        }
    })
}

pub fn all() -> Vec<MigrationUnit> {
    vec![
        MigrationUnit::new(
            "20240101000000_initial_schema",
            "products, sales, sale_items and payments",
            up_initial_schema,
        )
        .reversible(down_initial_schema),
        MigrationUnit::new(
            "20240301000000_add_discount_codes",
            "discount_codes table",
            up_add_discount_codes,
        )
        .reversible(down_add_discount_codes),
        MigrationUnit::new(
            "20240501000000_collapse_payment_method",
            "collapse payment method enum (data-destructive, lossy reverse)",
            up_collapse_payment_method,
        )
        .reversible(down_collapse_payment_method),
        MigrationUnit::new(
            "20240701000000_add_sales_index",
            "index on sale_items.sale_id",
            up_add_sales_index,
        )
        .reversible(down_add_sales_index),
        MigrationUnit::new(
            "20240815000000_add_sale_notes_column",
            "sales.notes column",
            up_add_sale_notes_column,
        )
        .reversible(down_add_sale_notes_column),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Catalog;

    #[test]
    fn core_tables_excludes_later_additions() {
        assert!(!crate::CORE_TABLES.contains(&"discount_codes"));
    }

    #[test]
    fn every_unit_is_reversible() {
        let catalog = Catalog::pos();
        for unit in catalog.units() {
            assert!(unit.is_reversible(), "{} has no down transform", unit.id);
        }
    }
}
