//! The control contract: uniform result shapes returned by every public
//! operation. Nothing here formats a user-facing string; that is the
//! boundary's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a branch's migration state row.
///
/// Numeric values are a stable ABI (they are persisted), so the discriminants
/// must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum MigrationStatus {
    Pending = 0,
    InProgress = 1,
    Completed = 2,
    Failed = 3,
    RequiresManualIntervention = 4,
}

impl MigrationStatus {
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Pending),
            1 => Some(Self::InProgress),
            2 => Some(Self::Completed),
            3 => Some(Self::Failed),
            4 => Some(Self::RequiresManualIntervention),
            _ => None,
        }
    }

    pub fn wire(self) -> i32 {
        self as i32
    }
}

/// Outcome of a single-branch operation (`apply_one`, `rollback_last`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub branch_id: String,
    pub success: bool,
    pub applied_ids: Vec<String>,
    pub error: Option<String>,
    pub duration: std::time::Duration,
    pub status: MigrationStatus,
    pub retry_count: i32,
}

impl OperationResult {
    pub fn ok(branch_id: impl Into<String>, applied_ids: Vec<String>, status: MigrationStatus, duration: std::time::Duration) -> Self {
        Self {
            branch_id: branch_id.into(),
            success: true,
            applied_ids,
            error: None,
            duration,
            status,
            retry_count: 0,
        }
    }

    pub fn err(
        branch_id: impl Into<String>,
        error: impl Into<String>,
        status: MigrationStatus,
        retry_count: i32,
        duration: std::time::Duration,
    ) -> Self {
        Self {
            branch_id: branch_id.into(),
            success: false,
            applied_ids: Vec::new(),
            error: Some(error.into()),
            duration,
            status,
            retry_count,
        }
    }
}

/// Outcome of a fan-out operation (`apply_all`, `rollback_all`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateResult {
    pub success: bool,
    pub results: Vec<OperationResult>,
    pub duration: std::time::Duration,
}

impl AggregateResult {
    pub fn new(results: Vec<OperationResult>, duration: std::time::Duration) -> Self {
        let success = results.iter().all(|r| r.success || r.error.as_deref() == Some("already in progress"));
        Self { success, results, duration }
    }
}

/// Read-only view returned by `history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchHistory {
    pub branch_id: String,
    pub applied: Vec<String>,
    pub pending: Vec<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub status: MigrationStatus,
    pub retry_count: i32,
    pub error: Option<String>,
}
