use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use pyshift_core::engine::UpgradeRequest;
use pyshift_core::progress::IndicatifReporter;
use pyshift_core::types::{AnalyseOptions, Confidence, Severity, TierPolicy};

#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// Library to migrate (e.g. pydantic)
    pub library: String,

    /// Current version in the project
    #[arg(long)]
    pub from: String,

    /// Target version
    #[arg(long)]
    pub target: String,

    /// Path to the project (default: current directory)
    #[arg(short, long, default_value = ".")]
    pub path: PathBuf,

    /// Upper bound on rewrite tiers: tier1-only, up-to-tier2, all
    #[arg(long, default_value = "up-to-tier2")]
    pub tier_policy: String,

    /// Skip rules below this confidence: high, medium, low
    #[arg(long, default_value = "medium")]
    pub confidence_floor: String,

    /// Extra exclude globs
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Analyse without persisting the session
    #[arg(long)]
    pub dry_run: bool,
}

fn parse_floor(s: &str) -> anyhow::Result<Confidence> {
    match s {
        "high" => Ok(Confidence::High),
        "medium" => Ok(Confidence::Medium),
        "low" => Ok(Confidence::Low),
        other => anyhow::bail!("unknown confidence floor '{other}'"),
    }
}

pub async fn run(args: UpgradeArgs) -> anyhow::Result<()> {
    let root = super::resolve_root(&args.path)?;
    let engine = super::build_engine(&root)?;

    let tier_policy: TierPolicy = args
        .tier_policy
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let options = AnalyseOptions {
        tier_policy,
        confidence_floor: parse_floor(&args.confidence_floor)?,
        exclude: args.exclude.clone(),
        dry_run: args.dry_run,
    };
    let request = UpgradeRequest {
        library: args.library.clone(),
        from_version: args.from.clone(),
        to_version: args.target.clone(),
    };

    let session = engine
        .analyse_with_progress(&request, &options, &IndicatifReporter::new())
        .await
        .context("analysis failed")?;

    println!(
        "{} {} -> {}: {} file(s), {} change(s), risk {} ({:?})",
        session.library,
        session.from_version,
        session.to_version,
        session.patches.len(),
        session.change_count(),
        session.risk.score,
        session.risk.level,
    );

    for patch in &session.patches {
        println!(
            "  {} [{}] {} change(s)",
            patch.path.display(),
            patch.tier,
            patch.changes.len()
        );
    }

    let warnings = session
        .diagnostics
        .iter()
        .filter(|d| d.severity != Severity::Info)
        .count();
    if warnings > 0 {
        println!("\n{warnings} finding(s):");
        for diagnostic in &session.diagnostics {
            if diagnostic.severity == Severity::Info {
                continue;
            }
            match &diagnostic.path {
                Some(path) => println!("  {}: {}", path.display(), diagnostic.message),
                None => println!("  {}", diagnostic.message),
            }
        }
    }

    if !args.dry_run && !session.patches.is_empty() {
        println!("\nReview with `pyshift diff`, then `pyshift apply`.");
    }
    Ok(())
}
