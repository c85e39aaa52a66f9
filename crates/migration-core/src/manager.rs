//! The Migration Manager: orchestrates the apply/rollback state machine for
//! one branch at a time, owns lock acquisition/release, retry accounting,
//! fan-out over all active branches, history queries and validation
//! dispatch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use migration_catalog::Catalog;
use tracing::{error, info, instrument, warn};

use crate::contract::{AggregateResult, BranchHistory, MigrationStatus, OperationResult};
use crate::error::CoreError;
use crate::lock::{AcquireOutcome, LockManager};
use crate::registry::BranchRegistry;
use crate::state::{MigrationState, StateStore};
use crate::strategy::StrategySelector;

pub struct MigrationManager {
    registry: Arc<dyn BranchRegistry>,
    state_store: Arc<dyn StateStore>,
    locks: LockManager,
    selector: StrategySelector,
    catalog: Catalog,
}

impl MigrationManager {
    pub fn new(registry: Arc<dyn BranchRegistry>, state_store: Arc<dyn StateStore>, catalog: Catalog) -> Self {
        let locks = LockManager::new(state_store.clone());
        Self {
            registry,
            state_store,
            locks,
            selector: StrategySelector::new(),
            catalog,
        }
    }

    /// `Start → LockCheck → ConnectCheck → BootstrapOrIncrement → Validate →
    /// CommitState → LockRelease → End`, with every transition's failure
    /// branch merging into `CommitFailure → LockRelease → End`.
    #[instrument(skip(self), fields(branch_id = %branch_id))]
    pub async fn apply_one(&self, branch_id: &str, target_id: Option<&str>) -> OperationResult {
        let start = Instant::now();

        let branch = match self.registry.get(branch_id).await {
            Some(b) => b,
            None => {
                return OperationResult::err(
                    branch_id,
                    CoreError::BranchNotFound.to_string(),
                    MigrationStatus::Pending,
                    0,
                    start.elapsed(),
                )
            }
        };

        let token = match self.locks.acquire(branch_id).await {
            Ok(AcquireOutcome::Acquired(token)) => token,
            Ok(AcquireOutcome::Busy) => {
                return OperationResult::err(
                    branch_id,
                    CoreError::LockBusy.to_string(),
                    MigrationStatus::Pending,
                    0,
                    start.elapsed(),
                )
            }
            Err(err) => {
                return OperationResult::err(branch_id, err.to_string(), MigrationStatus::Pending, 0, start.elapsed())
            }
        };
        let _ = token; // ownership is proven by having acquired; nothing further keys off the value itself

        let result = self.apply_one_locked(&branch, target_id, start).await;

        if let Err(err) = self.locks.release(branch_id).await {
            error!(branch_id, error = %err, "failed to release lock after apply_one");
        }

        result
    }

    async fn apply_one_locked(
        &self,
        branch: &crate::registry::Branch,
        target_id: Option<&str>,
        start: Instant,
    ) -> OperationResult {
        let branch_id = branch.id.as_str();
        let mut state = match self.state_store.load_or_create(branch_id).await {
            Ok(s) => s,
            Err(err) => {
                return OperationResult::err(branch_id, err.to_string(), MigrationStatus::Pending, 0, start.elapsed())
            }
        };

        let strategy = match self.selector.select(branch.provider) {
            Ok(s) => s,
            Err(err) => {
                return OperationResult::err(
                    branch_id,
                    err.to_string(),
                    state.status,
                    state.retry_count,
                    start.elapsed(),
                )
            }
        };

        if !strategy.can_connect(&branch.connection_descriptor).await {
            let err = CoreError::ConnectivityFailure("can_connect returned false".to_string());
            return self.commit_failure(&mut state, err, start).await;
        }

        if let Err(err) = strategy.ensure_database(&branch.connection_descriptor).await {
            let err = CoreError::ConnectivityFailure(err.to_string());
            return self.commit_failure(&mut state, err, start).await;
        }

        let mut conn = match strategy.open(&branch.connection_descriptor).await {
            Ok(c) => c,
            Err(err) => {
                let err = CoreError::ConnectivityFailure(err.to_string());
                return self.commit_failure(&mut state, err, start).await;
            }
        };

        let pending = match strategy.pending_ids(&mut conn, &self.catalog).await {
            Ok(p) => p,
            Err(err) => return self.commit_failure(&mut state, err.into(), start).await,
        };

        if pending.is_empty() {
            // I3: Completed implies retry_count == 0 and error_details == None.
            // A prior IntegrityFailure after a successful apply_forward can
            // leave the state Failed/retry>0 even though nothing is pending
            // here, so this has to clear that slate, not just flip the status.
            let last_applied = state.last_migration_applied.clone();
            state.record_success(last_applied, Utc::now());
            if let Err(err) = self.state_store.save(&state).await {
                warn!(branch_id, error = %err, "failed to persist no-op completed state");
            }
            return OperationResult::ok(branch_id, Vec::new(), MigrationStatus::Completed, start.elapsed());
        }

        state.status = MigrationStatus::InProgress;
        state.updated_at = Utc::now();
        if let Err(err) = self.state_store.save(&state).await {
            warn!(branch_id, error = %err, "failed to persist InProgress state");
        }

        if let Err(err) = strategy.apply_forward(&mut conn, target_id, &self.catalog).await {
            return self.commit_failure(&mut state, err.into(), start).await;
        }

        if !strategy.validate_schema(&mut conn).await {
            return self.commit_failure(&mut state, CoreError::IntegrityFailure, start).await;
        }

        let applied = match strategy.applied_ids(&mut conn).await {
            Ok(a) => a,
            Err(err) => return self.commit_failure(&mut state, err.into(), start).await,
        };
        let last_applied = applied.last().cloned().unwrap_or_default();

        state.record_success(last_applied, Utc::now());
        if let Err(err) = self.state_store.save(&state).await {
            warn!(branch_id, error = %err, "failed to persist Completed state");
        }

        info!(branch_id, applied = applied.len(), "apply_one completed");
        OperationResult::ok(branch_id, applied, MigrationStatus::Completed, start.elapsed())
    }

    async fn commit_failure(&self, state: &mut MigrationState, err: CoreError, start: Instant) -> OperationResult {
        let branch_id = state.branch_id.clone();
        if err.bumps_retry() {
            state.record_failure(err.to_string(), Utc::now());
        }
        if let Err(save_err) = self.state_store.save(state).await {
            error!(branch_id = %branch_id, error = %save_err, "failed to persist failure state");
        }
        error!(branch_id = %branch_id, error = %err, retry_count = state.retry_count, "apply_one failed");
        OperationResult::err(branch_id, err.to_string(), state.status, state.retry_count, start.elapsed())
    }

    /// Sequential over active branches; order is deterministic within a run
    /// (registry iteration order) but otherwise unspecified.
    #[instrument(skip(self))]
    pub async fn apply_all(&self) -> AggregateResult {
        let start = Instant::now();
        let branches = self.registry.active_branches().await;
        let mut results = Vec::with_capacity(branches.len());
        for branch in branches {
            results.push(self.apply_one(&branch.id, None).await);
        }
        AggregateResult::new(results, start.elapsed())
    }

    #[instrument(skip(self), fields(branch_id = %branch_id))]
    pub async fn rollback_last(&self, branch_id: &str) -> OperationResult {
        let start = Instant::now();

        let branch = match self.registry.get(branch_id).await {
            Some(b) => b,
            None => {
                return OperationResult::err(
                    branch_id,
                    CoreError::BranchNotFound.to_string(),
                    MigrationStatus::Pending,
                    0,
                    start.elapsed(),
                )
            }
        };

        let token = match self.locks.acquire(branch_id).await {
            Ok(AcquireOutcome::Acquired(token)) => token,
            Ok(AcquireOutcome::Busy) => {
                return OperationResult::err(
                    branch_id,
                    CoreError::LockBusy.to_string(),
                    MigrationStatus::Pending,
                    0,
                    start.elapsed(),
                )
            }
            Err(err) => {
                return OperationResult::err(branch_id, err.to_string(), MigrationStatus::Pending, 0, start.elapsed())
            }
        };
        let _ = token;

        let result = self.rollback_last_locked(&branch, start).await;

        if let Err(err) = self.locks.release(branch_id).await {
            error!(branch_id, error = %err, "failed to release lock after rollback_last");
        }

        result
    }

    async fn rollback_last_locked(&self, branch: &crate::registry::Branch, start: Instant) -> OperationResult {
        let branch_id = branch.id.as_str();
        let mut state = match self.state_store.load_or_create(branch_id).await {
            Ok(s) => s,
            Err(err) => {
                return OperationResult::err(branch_id, err.to_string(), MigrationStatus::Pending, 0, start.elapsed())
            }
        };

        let strategy = match self.selector.select(branch.provider) {
            Ok(s) => s,
            Err(err) => {
                return OperationResult::err(
                    branch_id,
                    err.to_string(),
                    state.status,
                    state.retry_count,
                    start.elapsed(),
                )
            }
        };

        let mut conn = match strategy.open(&branch.connection_descriptor).await {
            Ok(c) => c,
            Err(err) => {
                let err = CoreError::ConnectivityFailure(err.to_string());
                return self.commit_failure(&mut state, err, start).await;
            }
        };

        let mut applied = match strategy.applied_ids(&mut conn).await {
            Ok(a) => a,
            Err(err) => return self.commit_failure(&mut state, err.into(), start).await,
        };
        applied.sort();

        if applied.is_empty() {
            return OperationResult::err(
                branch_id,
                CoreError::NothingToRollback.to_string(),
                state.status,
                state.retry_count,
                start.elapsed(),
            );
        }

        // Target = second-to-last applied id, or empty (pre-initial) if only
        // one is applied.
        let target = if applied.len() >= 2 {
            applied[applied.len() - 2].clone()
        } else {
            String::new()
        };

        state.status = MigrationStatus::InProgress;
        state.updated_at = Utc::now();
        if let Err(err) = self.state_store.save(&state).await {
            warn!(branch_id, error = %err, "failed to persist InProgress state before rollback");
        }

        if let Err(err) = strategy.apply_reverse(&mut conn, &target, &self.catalog).await {
            return self.commit_failure(&mut state, err.into(), start).await;
        }

        // The integrity probe checks for the core tables, which is only
        // meaningful once the initial transform is in place. A rollback all
        // the way past it (`target` empty, pre-initial) legitimately leaves
        // the branch without them (spec scenario 6), so skip the probe there
        // rather than treating an expected, empty schema as a failure.
        if !target.is_empty() && !strategy.validate_schema(&mut conn).await {
            return self.commit_failure(&mut state, CoreError::IntegrityFailure, start).await;
        }

        let remaining = match strategy.applied_ids(&mut conn).await {
            Ok(a) => a,
            Err(err) => return self.commit_failure(&mut state, err.into(), start).await,
        };

        state.record_success(remaining.last().cloned().unwrap_or_default(), Utc::now());
        if let Err(err) = self.state_store.save(&state).await {
            warn!(branch_id, error = %err, "failed to persist Completed state after rollback");
        }

        info!(branch_id, remaining = remaining.len(), "rollback_last completed");
        OperationResult::ok(branch_id, remaining, MigrationStatus::Completed, start.elapsed())
    }

    #[instrument(skip(self))]
    pub async fn rollback_all(&self) -> AggregateResult {
        let start = Instant::now();
        let branches = self.registry.active_branches().await;
        let mut results = Vec::with_capacity(branches.len());
        for branch in branches {
            results.push(self.rollback_last(&branch.id).await);
        }
        AggregateResult::new(results, start.elapsed())
    }

    /// Read-only: never mutates state, never acquires a lock.
    pub async fn list_pending(&self, branch_id: &str) -> Result<Vec<String>, CoreError> {
        let branch = self.registry.get(branch_id).await.ok_or(CoreError::BranchNotFound)?;
        let strategy = self.selector.select(branch.provider)?;
        let mut conn = strategy.open(&branch.connection_descriptor).await?;
        Ok(strategy.pending_ids(&mut conn, &self.catalog).await?)
    }

    /// Read-only: never mutates state, never acquires a lock.
    pub async fn history(&self, branch_id: &str) -> Result<BranchHistory, CoreError> {
        let branch = self.registry.get(branch_id).await.ok_or(CoreError::BranchNotFound)?;
        let state = self.state_store.load_or_create(branch_id).await?;
        let strategy = self.selector.select(branch.provider)?;
        let mut conn = strategy.open(&branch.connection_descriptor).await?;
        let applied = strategy.applied_ids(&mut conn).await?;
        let pending = strategy.pending_ids(&mut conn, &self.catalog).await?;

        Ok(BranchHistory {
            branch_id: branch_id.to_string(),
            applied,
            pending,
            last_attempt_at: Some(state.last_attempt_at),
            status: state.status,
            retry_count: state.retry_count,
            error: state.error_details,
        })
    }

    /// Read-only: never mutates state, never acquires a lock.
    pub async fn validate(&self, branch_id: &str) -> Result<bool, CoreError> {
        let branch = self.registry.get(branch_id).await.ok_or(CoreError::BranchNotFound)?;
        let strategy = self.selector.select(branch.provider)?;
        let mut conn = strategy.open(&branch.connection_descriptor).await?;
        Ok(strategy.validate_schema(&mut conn).await)
    }
}

/// Time the lease enforces as the only wall-clock deadline in the system.
pub fn lease_timeout() -> Duration {
    Duration::from_secs(600)
}
