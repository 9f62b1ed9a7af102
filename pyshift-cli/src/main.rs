use clap::Parser;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "pyshift",
    version,
    about = "Migrate Python projects across breaking library upgrades"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Classify an error into an exit code.
///
/// Exit codes:
///   0 — success
///   1 — general/unknown error
///   2 — configuration error
///   3 — project root not found / no pending session
///   4 — source parse error
///   5 — oracle/network error
///   6 — apply requested but zero patches applied
fn classify_exit_code(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}").to_lowercase();

    if msg.contains("no pending session") || msg.contains("root not found") {
        3
    } else if msg.contains("config") {
        2
    } else if msg.contains("parse error") {
        4
    } else if msg.contains("oracle") || msg.contains("network") || msg.contains("timed out") {
        5
    } else if msg.contains("nothing could be applied") {
        6
    } else {
        1
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Failed to create runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(commands::run(cli.command)) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(classify_exit_code(&e));
        }
    }
}
