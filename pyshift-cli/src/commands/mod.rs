use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Subcommand;

use pyshift_core::config::PyshiftConfig;
use pyshift_core::engine::MigrationEngine;
use pyshift_core::knowledge::cache::SpecCache;
use pyshift_core::knowledge::sources::PypiSourceFetcher;
use pyshift_core::knowledge::KnowledgeService;
use pyshift_core::oracle::providers::AnthropicOracle;
use pyshift_core::store::PatchStore;

mod apply;
mod diff;
mod libraries;
mod reset;
mod restore;
mod scan;
mod status;
mod upgrade;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List declared dependencies with latest versions and tier support
    Scan(scan::ScanArgs),
    /// Analyse a library upgrade and stage the edits
    Upgrade(upgrade::UpgradeArgs),
    /// Show the pending edits as a unified diff
    Diff(diff::DiffArgs),
    /// Apply the pending edits to disk
    Apply(apply::ApplyArgs),
    /// Show the pending session summary
    Status(status::StatusArgs),
    /// List libraries with pre-coded transformers
    Libraries(libraries::LibrariesArgs),
    /// Discard the pending session without applying
    Reset(reset::ResetArgs),
    /// Restore files from a backup directory
    Restore(restore::RestoreArgs),
}

pub async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Scan(args) => scan::run(args).await,
        Command::Upgrade(args) => upgrade::run(args).await,
        Command::Diff(args) => diff::run(args),
        Command::Apply(args) => apply::run(args),
        Command::Status(args) => status::run(args),
        Command::Libraries(args) => libraries::run(args),
        Command::Reset(args) => reset::run(args),
        Command::Restore(args) => restore::run(args),
    }
}

/// Canonicalize the project path argument.
pub fn resolve_root(path: &Path) -> anyhow::Result<PathBuf> {
    std::fs::canonicalize(path)
        .with_context(|| format!("Cannot resolve path: {}", path.display()))
}

/// Build an engine wired with whatever collaborators the environment
/// provides: the changelog fetcher always, the oracle only when an API
/// key is configured.
pub fn build_engine(root: &Path) -> anyhow::Result<MigrationEngine> {
    let config = PyshiftConfig::load(root)?;
    let store = PatchStore::new(root);

    let mut engine = MigrationEngine::new(root, config.clone());

    if config.oracle.enabled {
        if let Some(oracle) = AnthropicOracle::from_config(&config.oracle) {
            let oracle = Arc::new(oracle);
            let knowledge = KnowledgeService::new(
                Arc::new(PypiSourceFetcher::new(config.knowledge.max_documents)),
                Arc::clone(&oracle) as Arc<dyn pyshift_core::oracle::ExtractionOracle>,
                SpecCache::new(&store.cache_dir(), config.knowledge.cache_ttl_days),
            );
            engine = engine.with_knowledge(knowledge).with_rewrite_oracle(oracle);
        }
    }

    Ok(engine)
}
