//! Migration State: the one-row-per-branch record the manager owns
//! exclusively. Persisted in the head-office store behind [`StateStore`].
//!
//! Timestamps are stored as RFC3339 text rather than a native timestamp
//! column so the same schema works unmodified across SQLite, PostgreSQL and
//! MySQL via `sqlx::Any` — the head-office store is never SQL Server.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::contract::MigrationStatus;

pub const MAX_RETRIES: i32 = 3;

pub fn lease_duration() -> Duration {
    Duration::minutes(10)
}

#[derive(Debug, Clone)]
pub struct MigrationState {
    pub id: String,
    pub branch_id: String,
    pub last_migration_applied: String,
    pub status: MigrationStatus,
    pub last_attempt_at: DateTime<Utc>,
    pub retry_count: i32,
    pub error_details: Option<String>,
    pub lock_owner_id: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MigrationState {
    pub fn fresh(branch_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            branch_id: branch_id.to_string(),
            last_migration_applied: String::new(),
            status: MigrationStatus::Pending,
            last_attempt_at: now,
            retry_count: 0,
            error_details: None,
            lock_owner_id: None,
            lock_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// I1: `lock_owner_id` null iff `lock_expires_at` null.
    /// I2: `retry_count` within `[0, MAX_RETRIES]`.
    /// I3: `Completed` implies a clean retry/error slate.
    pub fn check_invariants(&self) -> bool {
        let i1 = self.lock_owner_id.is_some() == self.lock_expires_at.is_some();
        let i2 = (0..=MAX_RETRIES).contains(&self.retry_count);
        let i3 = self.status != MigrationStatus::Completed
            || (self.retry_count == 0 && self.error_details.is_none());
        i1 && i2 && i3
    }

    pub fn record_success(&mut self, last_applied_id: String, now: DateTime<Utc>) {
        self.last_migration_applied = last_applied_id;
        self.status = MigrationStatus::Completed;
        self.retry_count = 0;
        self.error_details = None;
        self.last_attempt_at = now;
        self.updated_at = now;
    }

    pub fn record_failure(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.retry_count += 1;
        self.status = if self.retry_count >= MAX_RETRIES {
            MigrationStatus::RequiresManualIntervention
        } else {
            MigrationStatus::Failed
        };
        self.error_details = Some(error.into());
        self.last_attempt_at = now;
        self.updated_at = now;
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_or_create(&self, branch_id: &str) -> Result<MigrationState, sqlx::Error>;
    async fn save(&self, state: &MigrationState) -> Result<(), sqlx::Error>;
    async fn active_branch_ids(&self) -> Result<Vec<String>, sqlx::Error>;
}

/// `StateStore` backed by the head-office `migration_state` table, reachable
/// through any of the three `sqlx::Any`-capable backends.
pub struct SqlxStateStore {
    pool: AnyPool,
}

impl SqlxStateStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = AnyPoolOptions::new().max_connections(8).connect(url).await?;
        Ok(Self { pool })
    }

    /// Creates the `migration_state` table and its indexes if absent.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS migration_state ( \
                 id TEXT PRIMARY KEY, \
                 branch_id TEXT NOT NULL UNIQUE, \
                 last_migration_applied TEXT NOT NULL DEFAULT '', \
                 status INTEGER NOT NULL, \
                 last_attempt_at TEXT NOT NULL, \
                 retry_count INTEGER NOT NULL DEFAULT 0, \
                 error_details TEXT, \
                 lock_owner_id TEXT, \
                 lock_expires_at TEXT, \
                 created_at TEXT NOT NULL, \
                 updated_at TEXT NOT NULL \
             )",
        )
        .execute(&self.pool)
        .await?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_migration_state_status ON migration_state(status)",
            "CREATE INDEX IF NOT EXISTS idx_migration_state_last_attempt ON migration_state(last_attempt_at)",
            "CREATE INDEX IF NOT EXISTS idx_migration_state_lock_expires ON migration_state(lock_expires_at)",
        ] {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn row_to_state(row: &sqlx::any::AnyRow) -> Result<MigrationState, sqlx::Error> {
        let status_wire: i32 = row.try_get("status")?;
        let status = MigrationStatus::from_wire(status_wire).unwrap_or(MigrationStatus::Pending);
        let parse_ts = |raw: String| -> DateTime<Utc> {
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now())
        };
        Ok(MigrationState {
            id: row.try_get("id")?,
            branch_id: row.try_get("branch_id")?,
            last_migration_applied: row.try_get("last_migration_applied")?,
            status,
            last_attempt_at: parse_ts(row.try_get("last_attempt_at")?),
            retry_count: row.try_get("retry_count")?,
            error_details: row.try_get("error_details")?,
            lock_owner_id: row.try_get("lock_owner_id")?,
            lock_expires_at: row
                .try_get::<Option<String>, _>("lock_expires_at")?
                .map(parse_ts),
            created_at: parse_ts(row.try_get("created_at")?),
            updated_at: parse_ts(row.try_get("updated_at")?),
        })
    }
}

#[async_trait]
impl StateStore for SqlxStateStore {
    async fn load_or_create(&self, branch_id: &str) -> Result<MigrationState, sqlx::Error> {
        let existing = sqlx::query("SELECT * FROM migration_state WHERE branch_id = ?")
            .bind(branch_id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = existing {
            return Self::row_to_state(&row);
        }

        let state = MigrationState::fresh(branch_id, Utc::now());
        self.save(&state).await?;
        Ok(state)
    }

    /// Update-then-insert rather than `INSERT ... ON CONFLICT`: the latter's
    /// syntax differs between SQLite/PostgreSQL (`ON CONFLICT`) and MySQL
    /// (`ON DUPLICATE KEY UPDATE`), and the head-office store can be any of
    /// the three `sqlx::Any` backends.
    async fn save(&self, state: &MigrationState) -> Result<(), sqlx::Error> {
        let updated = sqlx::query(
            "UPDATE migration_state SET \
                 last_migration_applied = ?, status = ?, last_attempt_at = ?, \
                 retry_count = ?, error_details = ?, lock_owner_id = ?, \
                 lock_expires_at = ?, updated_at = ? \
             WHERE branch_id = ?",
        )
        .bind(&state.last_migration_applied)
        .bind(state.status.wire())
        .bind(state.last_attempt_at.to_rfc3339())
        .bind(state.retry_count)
        .bind(&state.error_details)
        .bind(&state.lock_owner_id)
        .bind(state.lock_expires_at.map(|t| t.to_rfc3339()))
        .bind(state.updated_at.to_rfc3339())
        .bind(&state.branch_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() > 0 {
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO migration_state ( \
                 id, branch_id, last_migration_applied, status, last_attempt_at, \
                 retry_count, error_details, lock_owner_id, lock_expires_at, created_at, updated_at \
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&state.id)
        .bind(&state.branch_id)
        .bind(&state.last_migration_applied)
        .bind(state.status.wire())
        .bind(state.last_attempt_at.to_rfc3339())
        .bind(state.retry_count)
        .bind(&state.error_details)
        .bind(&state.lock_owner_id)
        .bind(state.lock_expires_at.map(|t| t.to_rfc3339()))
        .bind(state.created_at.to_rfc3339())
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_branch_ids(&self) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query("SELECT branch_id FROM migration_state")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| r.try_get("branch_id")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_satisfies_invariants() {
        let state = MigrationState::fresh("branch-1", Utc::now());
        assert!(state.check_invariants());
    }

    #[test]
    fn record_failure_escalates_at_max_retries() {
        let mut state = MigrationState::fresh("branch-1", Utc::now());
        state.retry_count = MAX_RETRIES - 1;
        state.record_failure("boom", Utc::now());
        assert_eq!(state.status, MigrationStatus::RequiresManualIntervention);
        assert_eq!(state.retry_count, MAX_RETRIES);
    }

    #[test]
    fn record_success_clears_retry_and_error() {
        let mut state = MigrationState::fresh("branch-1", Utc::now());
        state.retry_count = 2;
        state.error_details = Some("previous failure".to_string());
        state.record_success("m0002".to_string(), Utc::now());
        assert!(state.check_invariants());
        assert_eq!(state.retry_count, 0);
        assert!(state.error_details.is_none());
    }
}
