//! The branch registry is an external collaborator: source of branch
//! identity and connection metadata. The core only reads through this
//! trait and never mutates a branch record.

use async_trait::async_trait;
use migration_catalog::ProviderTag;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone)]
pub struct Branch {
    pub id: String,
    pub code: String,
    pub display_name: String,
    pub active: bool,
    pub provider: ProviderTag,
    /// Opaque; may contain credentials. Never logged without redaction
    /// (see `strategy::redact`).
    pub connection_descriptor: String,
}

#[async_trait]
pub trait BranchRegistry: Send + Sync {
    async fn get(&self, branch_id: &str) -> Option<Branch>;
    async fn active_branches(&self) -> Vec<Branch>;
}

/// In-memory registry. Exercises the core's collaborator boundary in tests
/// and local runs; a real deployment wires this to the head-office registry
/// service over its own transport.
#[derive(Default)]
pub struct InMemoryRegistry {
    branches: RwLock<HashMap<String, Branch>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, branch: Branch) {
        self.branches.write().unwrap().insert(branch.id.clone(), branch);
    }
}

#[async_trait]
impl BranchRegistry for InMemoryRegistry {
    async fn get(&self, branch_id: &str) -> Option<Branch> {
        self.branches.read().unwrap().get(branch_id).cloned()
    }

    async fn active_branches(&self) -> Vec<Branch> {
        self.branches
            .read()
            .unwrap()
            .values()
            .filter(|b| b.active)
            .cloned()
            .collect()
    }
}
