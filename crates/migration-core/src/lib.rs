//! The multi-tenant, multi-provider branch schema migration engine.
//!
//! Brings a branch's schema to the latest known version (or an earlier,
//! explicitly requested one) exactly once, safely, with recovery. See
//! `manager::MigrationManager` for the orchestrator and `strategy` for the
//! per-backend implementations it dispatches to.

pub mod config;
pub mod contract;
pub mod error;
pub mod lock;
pub mod manager;
pub mod reconciler;
pub mod registry;
pub mod state;
pub mod strategy;

pub use contract::{AggregateResult, BranchHistory, MigrationStatus, OperationResult};
pub use error::CoreError;
pub use manager::MigrationManager;
pub use reconciler::Reconciler;
pub use registry::{Branch, BranchRegistry, InMemoryRegistry};
pub use state::{MigrationState, StateStore};
pub use strategy::{ProviderStrategy, StrategySelector};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::registry::{Branch, InMemoryRegistry};
    use migration_catalog::{Catalog, ProviderTag};
    use std::sync::Arc;

    // `sqlite::memory:` hands out a brand new, unconnected database on every
    // `AnyConnection::connect` call, so branch descriptors in these tests
    // point at a uniquely named temp file instead — the manager reopens a
    // connection per operation, and only a file-backed database persists
    // state across those reopens the way a real branch would.
    fn temp_sqlite_descriptor() -> String {
        format!(
            "sqlite://{}/migrator-test-{}.db?mode=rwc",
            std::env::temp_dir().display(),
            uuid::Uuid::new_v4()
        )
    }

    async fn manager_with_sqlite_branch(branch_id: &str, descriptor: &str) -> MigrationManager {
        let state_pool = sqlx::AnyPool::connect("sqlite::memory:").await.unwrap();
        let state_store = Arc::new(state::SqlxStateStore::new(state_pool));
        state_store.migrate().await.unwrap();

        let registry = Arc::new(InMemoryRegistry::new());
        registry.insert(Branch {
            id: branch_id.to_string(),
            code: "br1".to_string(),
            display_name: "Test Branch".to_string(),
            active: true,
            provider: ProviderTag::Sqlite,
            connection_descriptor: descriptor.to_string(),
        });

        MigrationManager::new(registry, state_store, Catalog::pos())
    }

    #[tokio::test]
    async fn apply_one_brings_fresh_branch_to_completed() {
        let descriptor = temp_sqlite_descriptor();
        let manager = manager_with_sqlite_branch("b1", &descriptor).await;
        let result = manager.apply_one("b1", None).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.status, MigrationStatus::Completed);
        assert!(!result.applied_ids.is_empty());
    }

    #[tokio::test]
    async fn apply_one_is_idempotent_on_completed_state() {
        let descriptor = temp_sqlite_descriptor();
        let manager = manager_with_sqlite_branch("b1", &descriptor).await;
        let first = manager.apply_one("b1", None).await;
        assert!(first.success, "{:?}", first.error);

        // I7: calling apply_one again with no new catalog entries succeeds
        // with zero newly applied ids and no retry bump.
        let second = manager.apply_one("b1", None).await;
        assert!(second.success, "{:?}", second.error);
        assert!(second.applied_ids.is_empty());
    }

    #[tokio::test]
    async fn apply_one_reports_branch_not_found() {
        let descriptor = temp_sqlite_descriptor();
        let manager = manager_with_sqlite_branch("b1", &descriptor).await;
        let result = manager.apply_one("does-not-exist", None).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("branch not found"));
    }

    #[tokio::test]
    async fn list_pending_never_touches_state() {
        let descriptor = temp_sqlite_descriptor();
        let manager = manager_with_sqlite_branch("b1", &descriptor).await;
        let pending = manager.list_pending("b1").await.unwrap();
        assert_eq!(pending.len(), Catalog::pos().units().len());
    }

    #[tokio::test]
    async fn rollback_last_removes_exactly_one_applied_id() {
        let descriptor = temp_sqlite_descriptor();
        let manager = manager_with_sqlite_branch("b1", &descriptor).await;
        let applied_before = manager.apply_one("b1", None).await.applied_ids;

        let result = manager.rollback_last("b1").await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.applied_ids.len(), applied_before.len() - 1);
    }
}
