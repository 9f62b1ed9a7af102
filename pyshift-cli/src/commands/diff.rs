use std::path::PathBuf;

use clap::Args;

use pyshift_core::engine::MigrationEngine;
use pyshift_core::store::PatchStore;

#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Path to the project (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

pub fn run(args: DiffArgs) -> anyhow::Result<()> {
    let root = super::resolve_root(&args.path)?;
    let session = PatchStore::new(&root).load_session()?;
    let diff = MigrationEngine::diff(&session);
    if diff.is_empty() {
        println!("No pending edits.");
    } else {
        print!("{diff}");
    }
    Ok(())
}
