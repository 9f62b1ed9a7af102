use std::path::PathBuf;

use clap::Args;

use pyshift_core::types::ApplyOptions;

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Path to the project (default: current directory)
    #[arg(short, long, default_value = ".")]
    pub path: PathBuf,

    /// Apply only the named file's patch
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Save originals under .pyshift/backups/ before overwriting
    #[arg(long)]
    pub backup: bool,
}

pub fn run(args: ApplyArgs) -> anyhow::Result<()> {
    let root = super::resolve_root(&args.path)?;
    let engine = super::build_engine(&root)?;

    let options = ApplyOptions {
        backup: args.backup,
        file: args.file.clone(),
    };
    let report = engine.apply(&options)?;

    for path in &report.applied {
        println!("applied  {}", path.display());
    }
    for path in &report.skipped {
        println!("already  {}", path.display());
    }
    for (path, reason) in &report.failed {
        println!("failed   {} ({reason})", path.display());
    }
    if let Some(dir) = &report.backup_dir {
        println!("backups saved to {}", dir.display());
    }

    if report.applied.is_empty() && report.skipped.is_empty() {
        anyhow::bail!("nothing could be applied");
    }
    println!(
        "\n{} file(s) applied. Run your test suite before committing.",
        report.applied.len()
    );
    Ok(())
}
