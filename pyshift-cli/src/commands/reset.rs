use std::path::PathBuf;

use clap::Args;

use pyshift_core::store::PatchStore;

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Path to the project (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

pub fn run(args: ResetArgs) -> anyhow::Result<()> {
    let root = super::resolve_root(&args.path)?;
    let store = PatchStore::new(&root);

    if !store.has_session() {
        println!("No pending migration to reset.");
        return Ok(());
    }
    store.clear_session()?;
    println!("Pending migration discarded. No files were modified.");
    Ok(())
}
