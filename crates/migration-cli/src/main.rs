use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use migration_catalog::Catalog;
use migration_core::state::SqlxStateStore;
use migration_core::MigrationManager;
use tracing::info;

mod branches;

/// Operator CLI over the branch schema migration engine's control contract.
#[derive(Parser)]
#[command(name = "migrator", version, about)]
struct Cli {
    /// TOML file describing branches (see `branches.rs` for the shape).
    #[arg(long, env = "MIGRATOR_BRANCHES_FILE", default_value = "branches.toml")]
    branches_file: PathBuf,

    /// Head-office state store connection string.
    #[arg(long, env = "MIGRATOR_STATE_STORE_URL", default_value = "sqlite://migrator-state.db?mode=rwc")]
    state_store_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bring one branch forward to the catalog head, or to `target`.
    ApplyOne {
        branch_id: String,
        #[arg(long)]
        target: Option<String>,
    },
    /// Bring every active branch forward to the catalog head.
    ApplyAll,
    /// Roll one branch back by exactly one applied unit.
    RollbackLast { branch_id: String },
    /// Roll every active branch back by exactly one applied unit.
    RollbackAll,
    /// List a branch's pending migration ids.
    ListPending { branch_id: String },
    /// Show a branch's applied/pending ids and state.
    History { branch_id: String },
    /// Run the integrity probe against a branch.
    Validate { branch_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let registry = branches::load_registry(&cli.branches_file)
        .with_context(|| format!("loading branches from {}", cli.branches_file.display()))?;

    let state_store = SqlxStateStore::connect(&cli.state_store_url)
        .await
        .context("connecting to head-office state store")?;
    state_store.migrate().await.context("initializing migration_state table")?;

    let manager = MigrationManager::new(Arc::new(registry), Arc::new(state_store), Catalog::pos());

    match cli.command {
        Command::ApplyOne { branch_id, target } => {
            let result = manager.apply_one(&branch_id, target.as_deref()).await;
            print_json(&result)?;
        }
        Command::ApplyAll => {
            let result = manager.apply_all().await;
            print_json(&result)?;
        }
        Command::RollbackLast { branch_id } => {
            let result = manager.rollback_last(&branch_id).await;
            print_json(&result)?;
        }
        Command::RollbackAll => {
            let result = manager.rollback_all().await;
            print_json(&result)?;
        }
        Command::ListPending { branch_id } => {
            let pending = manager.list_pending(&branch_id).await?;
            print_json(&pending)?;
        }
        Command::History { branch_id } => {
            let history = manager.history(&branch_id).await?;
            print_json(&history)?;
        }
        Command::Validate { branch_id } => {
            let valid = manager.validate(&branch_id).await?;
            info!(branch_id, valid, "validate");
            print_json(&serde_json::json!({ "branch_id": branch_id, "valid": valid }))?;
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
