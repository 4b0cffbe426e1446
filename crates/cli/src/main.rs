//! Entry point for the command-line interface.
//! Delegates to dedicated modules for argument handling,
//! scanning logic and output formatting.

use tainttrail::args::{parse_cli, Commands};
use tainttrail::scan::run_scan;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = parse_cli();
    match cli.command {
        Commands::Scan(args) => run_scan(args),
    }
}
