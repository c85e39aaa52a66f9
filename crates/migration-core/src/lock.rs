//! The two-layer per-branch lock: a process-wide mutex serializing the
//! acquire/release critical section, plus a lease persisted in the
//! Migration State row so the claim also holds across processes.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::state::{lease_duration, StateStore};

pub enum AcquireOutcome {
    Acquired(String),
    Busy,
}

/// Guards the acquire/release critical section with a single process-wide
/// mutex. The acquire path is short (one read, maybe one write), so a single
/// mutex for every branch is sufficient; it does not gate the DDL work that
/// follows acquisition.
pub struct LockManager {
    store: Arc<dyn StateStore>,
    critical_section: Mutex<()>,
}

impl LockManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            critical_section: Mutex::new(()),
        }
    }

    /// Attempts to acquire the lease for `branch_id`. An expired lease is
    /// treated as free and cleared before a fresh claim is attempted.
    pub async fn acquire(&self, branch_id: &str) -> Result<AcquireOutcome, sqlx::Error> {
        let _guard = self.critical_section.lock().await;

        let mut state = self.store.load_or_create(branch_id).await?;
        let now = Utc::now();

        if let Some(expires_at) = state.lock_expires_at {
            if expires_at < now {
                state.lock_owner_id = None;
                state.lock_expires_at = None;
            }
        }

        if state.lock_owner_id.is_some() {
            return Ok(AcquireOutcome::Busy);
        }

        let token = Uuid::new_v4().to_string();
        state.lock_owner_id = Some(token.clone());
        state.lock_expires_at = Some(now + lease_duration());
        state.updated_at = now;
        self.store.save(&state).await?;

        Ok(AcquireOutcome::Acquired(token))
    }

    /// Clears the lease fields unconditionally. Called from the failure path
    /// too, so it never assumes the caller still holds a valid token.
    pub async fn release(&self, branch_id: &str) -> Result<(), sqlx::Error> {
        let _guard = self.critical_section.lock().await;

        let mut state = self.store.load_or_create(branch_id).await?;
        state.lock_owner_id = None;
        state.lock_expires_at = None;
        state.updated_at = Utc::now();
        self.store.save(&state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MigrationState;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct MemStore(StdMutex<std::collections::HashMap<String, MigrationState>>);

    #[async_trait]
    impl StateStore for MemStore {
        async fn load_or_create(&self, branch_id: &str) -> Result<MigrationState, sqlx::Error> {
            let mut map = self.0.lock().unwrap();
            Ok(map
                .entry(branch_id.to_string())
                .or_insert_with(|| MigrationState::fresh(branch_id, Utc::now()))
                .clone())
        }

        async fn save(&self, state: &MigrationState) -> Result<(), sqlx::Error> {
            self.0.lock().unwrap().insert(state.branch_id.clone(), state.clone());
            Ok(())
        }

        async fn active_branch_ids(&self) -> Result<Vec<String>, sqlx::Error> {
            Ok(self.0.lock().unwrap().keys().cloned().collect())
        }
    }

    fn manager() -> LockManager {
        LockManager::new(Arc::new(MemStore(StdMutex::new(std::collections::HashMap::new()))))
    }

    #[tokio::test]
    async fn second_acquire_is_busy_until_released() {
        let mgr = manager();
        let first = mgr.acquire("b1").await.unwrap();
        assert!(matches!(first, AcquireOutcome::Acquired(_)));

        let second = mgr.acquire("b1").await.unwrap();
        assert!(matches!(second, AcquireOutcome::Busy));

        mgr.release("b1").await.unwrap();
        let third = mgr.acquire("b1").await.unwrap();
        assert!(matches!(third, AcquireOutcome::Acquired(_)));
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimable() {
        let mgr = manager();
        let mut state = mgr.store.load_or_create("b1").await.unwrap();
        state.lock_owner_id = Some("stale-token".to_string());
        state.lock_expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        mgr.store.save(&state).await.unwrap();

        let outcome = mgr.acquire("b1").await.unwrap();
        assert!(matches!(outcome, AcquireOutcome::Acquired(_)));
    }
}
