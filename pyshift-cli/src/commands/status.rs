use std::path::PathBuf;

use clap::Args;

use pyshift_core::store::PatchStore;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Path to the project (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

pub fn run(args: StatusArgs) -> anyhow::Result<()> {
    let root = super::resolve_root(&args.path)?;
    let store = PatchStore::new(&root);

    if !store.has_session() {
        println!("No pending migration in {}.", root.display());
        return Ok(());
    }

    let status = store.status()?;
    println!("Pending migration: {} -> {}", status.library, status.to_version);
    println!("  created:  {}", status.created_at.format("%Y-%m-%d %H:%M UTC"));
    println!("  patches:  {} ready, {} rejected", status.pending_patches, status.rejected_patches);
    println!("  risk:     {} ({:?})", status.risk.score, status.risk.level);
    for factor in &status.risk.factors {
        println!("            - {factor}");
    }
    Ok(())
}
