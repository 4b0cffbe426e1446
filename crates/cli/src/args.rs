use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::output::Format;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "tainttrail - static taint-flow analysis for PHP codebases",
    long_about = "tainttrail tracks user-controlled data through a PHP codebase and \
reports where it reaches security-sensitive sinks (HTML output, SQL drivers, \
shell execution, deserialization, file paths), with a source-to-sink cause \
trail per finding.

Examples:
  tainttrail scan .                      # Scan the current directory
  tainttrail scan src/ --format json     # Machine-readable output
  tainttrail scan app.php --fail-on      # Non-zero exit when taint is found",
    subcommand_required = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan PHP sources for taint flows into security sinks
    Scan(ScanArgs),
}

#[derive(ClapArgs)]
pub struct ScanArgs {
    /// Path to scan (file or directory)
    pub path: PathBuf,
    /// Output format for scan results
    #[arg(long, value_enum, default_value_t = Format::Text)]
    pub format: Format,
    /// Exit with an error code when findings exist
    #[arg(long = "fail-on")]
    pub fail_on: bool,
    /// Skip the parse cache
    #[arg(long)]
    pub no_cache: bool,
    /// Print the inferred per-function taint contracts as JSON
    #[arg(long)]
    pub dump_contracts: bool,
    /// Override the configured fixpoint pass cap
    #[arg(long)]
    pub max_passes: Option<usize>,
    /// Disable ANSI colors in text output
    #[arg(long)]
    pub no_color: bool,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}
