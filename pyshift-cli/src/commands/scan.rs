use std::path::PathBuf;

use clap::Args;

use pyshift_core::adapters::{ManifestLister, PypiVersionResolver};

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Path to the project (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Emit machine-readable JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ScanArgs) -> anyhow::Result<()> {
    let root = super::resolve_root(&args.path)?;
    let engine = super::build_engine(&root)?;

    let reports = engine.scan(&ManifestLister, &PypiVersionResolver::default()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if reports.is_empty() {
        println!("No dependencies found (looked for requirements.txt and pyproject.toml).");
        return Ok(());
    }

    println!("{:<24} {:<12} {:<12} {}", "package", "pinned", "latest", "tier-1");
    for report in &reports {
        println!(
            "{:<24} {:<12} {:<12} {}",
            report.package,
            report.pinned_version.as_deref().unwrap_or("-"),
            report.latest_version.as_deref().unwrap_or("?"),
            if report.tier1 { "yes" } else { "no" },
        );
    }
    Ok(())
}
