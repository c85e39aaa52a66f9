//! Error taxonomy shared across the engine.
//!
//! Kinds mirror the abstract taxonomy the manager enforces: each one carries
//! a retry/escalation policy, decided by [`CoreError::bumps_retry`] rather
//! than by the call site. The manager is the only place that turns an error
//! into a state transition; everywhere else just returns one.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("branch not found")]
    BranchNotFound,

    #[error("already in progress")]
    LockBusy,

    #[error("connectivity failure: {0}")]
    ConnectivityFailure(String),

    #[error("ddl failure: {0}")]
    DdlFailure(String),

    #[error("integrity validation failed")]
    IntegrityFailure,

    #[error("no migrations to rollback")]
    NothingToRollback,

    #[error("provider `{0}` is not supported")]
    Unsupported(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("state store error: {0}")]
    StateStore(#[from] sqlx::Error),
}

impl CoreError {
    /// Whether this error, surfaced between lock acquisition and commit,
    /// should bump the branch's retry counter. `BranchNotFound`, `LockBusy`
    /// and `Unsupported` all return before any mutation happens.
    pub fn bumps_retry(&self) -> bool {
        matches!(
            self,
            CoreError::ConnectivityFailure(_) | CoreError::DdlFailure(_) | CoreError::IntegrityFailure
        )
    }
}

impl From<crate::strategy::StrategyError> for CoreError {
    fn from(err: crate::strategy::StrategyError) -> Self {
        CoreError::DdlFailure(err.to_string())
    }
}
