use crate::args::ScanArgs;
use crate::config::load_config;
use crate::output::Format;
use anyhow::{bail, Result};
use engine::Analyzer;
use parsers::ParserMetrics;
use reporters::ScanInfo;
use std::fs;
use std::io::{stdout, IsTerminal};
use std::time::Instant;
use tracing::debug;

pub fn run_scan(args: ScanArgs) -> Result<()> {
    let config = load_config()?;
    let mut analyzer_config = config.analyzer_config();
    if let Some(max_passes) = args.max_passes {
        analyzer_config.max_passes = max_passes;
    }

    if !args.path.exists() {
        bail!("path does not exist: {}", args.path.display());
    }

    let cache_path = if args.no_cache {
        None
    } else {
        let path = config.cache.cache_file.clone();
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        Some(path)
    };

    let started = Instant::now();
    let mut metrics = ParserMetrics::default();
    let files = parsers::parse_php_project(&args.path, cache_path.as_deref(), Some(&mut metrics))?;
    debug!("parsed {} file(s)", files.len());

    let mut analyzer = Analyzer::new(analyzer_config);
    let findings = analyzer.analyze(&files);

    let info = ScanInfo {
        files_analyzed: metrics.files_parsed + metrics.cache_hits,
        parse_errors: metrics.parse_errors,
        cache_hits: metrics.cache_hits,
        duration_ms: started.elapsed().as_millis(),
    };

    let mut out = stdout().lock();
    if args.dump_contracts {
        serde_json::to_writer_pretty(&mut out, &analyzer.contract_dump())?;
        println!();
        return Ok(());
    }
    match args.format {
        Format::Text => {
            let color = !args.no_color && stdout().is_terminal();
            reporters::print_findings_text(&findings, &info, color, &mut out)?;
        }
        Format::Json => reporters::print_findings_json(&findings, &info, &mut out)?,
    }

    if args.fail_on && !findings.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
