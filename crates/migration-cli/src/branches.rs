//! Loads branch records for local/offline runs from a TOML file. A real
//! deployment wires `migration-core`'s `BranchRegistry` trait to the
//! head-office registry service instead; this file-backed registry exists
//! so the CLI is usable standalone and in tests.

use std::path::Path;

use anyhow::{Context, Result};
use migration_catalog::ProviderTag;
use migration_core::{Branch, InMemoryRegistry};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct BranchesFile {
    #[serde(rename = "branch", default)]
    branches: Vec<BranchRecord>,
}

#[derive(Debug, Deserialize)]
struct BranchRecord {
    id: String,
    code: String,
    display_name: String,
    #[serde(default = "default_active")]
    active: bool,
    provider: String,
    connection_descriptor: String,
}

fn default_active() -> bool {
    true
}

pub fn load_registry(path: &Path) -> Result<InMemoryRegistry> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading branches file at {}", path.display()))?;
    let file: BranchesFile = toml::from_str(&raw).context("parsing branches file")?;

    let registry = InMemoryRegistry::new();
    for record in file.branches {
        let provider: ProviderTag = record
            .provider
            .parse()
            .with_context(|| format!("branch `{}` has unsupported provider `{}`", record.id, record.provider))?;
        registry.insert(Branch {
            id: record.id,
            code: record.code,
            display_name: record.display_name,
            active: record.active,
            provider,
            connection_descriptor: record.connection_descriptor,
        });
    }
    Ok(registry)
}
