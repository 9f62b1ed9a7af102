use clap::Args;

use pyshift_core::config::PyshiftConfig;
use pyshift_core::engine::MigrationEngine;

#[derive(Args, Debug)]
pub struct LibrariesArgs {
    /// Emit machine-readable JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: LibrariesArgs) -> anyhow::Result<()> {
    let engine = MigrationEngine::new(std::path::Path::new("."), PyshiftConfig::default());
    let libraries = engine.libraries();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&libraries)?);
        return Ok(());
    }

    println!("{:<16} {:<10} {:<10} rules", "library", "from", "to");
    for library in &libraries {
        println!(
            "{:<16} {:<10} {:<10} {}",
            library.name, library.from_series, library.to_series, library.rule_count
        );
    }
    println!("\nOther libraries are handled through changelog analysis (tier 2/3).");
    Ok(())
}
