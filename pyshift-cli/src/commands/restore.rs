use std::path::PathBuf;

use clap::Args;

use pyshift_core::store::PatchStore;

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Backup directory to restore from (see `apply --backup` output)
    pub backup_dir: PathBuf,

    /// Path to the project (default: current directory)
    #[arg(short, long, default_value = ".")]
    pub path: PathBuf,
}

pub fn run(args: RestoreArgs) -> anyhow::Result<()> {
    let root = super::resolve_root(&args.path)?;
    let backup = super::resolve_root(&args.backup_dir)?;

    let restored = PatchStore::new(&root).restore(&backup)?;
    if restored.is_empty() {
        println!("No Python files found in {}.", backup.display());
        return Ok(());
    }
    for path in &restored {
        println!("restored {}", path.display());
    }
    println!("\n{} file(s) restored.", restored.len());
    Ok(())
}
