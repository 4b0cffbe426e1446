//! Formatters for findings in text and JSON.
//! Provide human and tool-friendly output.

use engine::Finding;
use serde::Serialize;
use std::io::{self, Write};

/// Returns the category colored with simple ANSI codes.
/// Adds no external dependencies.
fn color_category(category: &str) -> String {
    let code = match category {
        "html" | "sql" | "shell" | "serialize" => "\x1b[31m",
        "double-escape" => "\x1b[33m",
        _ => "\x1b[35m",
    };
    format!("{code}{}\x1b[0m", category.to_uppercase())
}

/// Scan-level counters shown after the findings.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ScanInfo {
    pub files_analyzed: usize,
    pub parse_errors: usize,
    pub cache_hits: usize,
    pub duration_ms: u128,
}

/// Render one finding with its cause trail as `(file:line) via …`.
fn render_finding(finding: &Finding, color: bool, out: &mut impl Write) -> io::Result<()> {
    let category = if color {
        color_category(&finding.category)
    } else {
        finding.category.to_uppercase()
    };
    writeln!(
        out,
        "{category} {}:{}  {}",
        finding.file, finding.line, finding.message
    )?;
    if !finding.caused_by.is_empty() {
        let chain = finding
            .caused_by
            .iter()
            .map(|point| format!("({}:{})", point.file, point.line))
            .collect::<Vec<_>>()
            .join(" via ");
        writeln!(out, "    caused by: {chain}")?;
    }
    Ok(())
}

pub fn print_findings_text(
    findings: &[Finding],
    info: &ScanInfo,
    color: bool,
    out: &mut impl Write,
) -> io::Result<()> {
    for finding in findings {
        render_finding(finding, color, out)?;
    }
    if findings.is_empty() {
        writeln!(out, "No taint flows found.")?;
    } else {
        writeln!(out, "\n{} finding(s).", findings.len())?;
    }
    writeln!(
        out,
        "{} file(s) analyzed, {} parse error(s), {} cache hit(s), {} ms",
        info.files_analyzed, info.parse_errors, info.cache_hits, info.duration_ms
    )
}

#[derive(Serialize)]
struct JsonReport<'a> {
    findings: &'a [Finding],
    info: &'a ScanInfo,
}

pub fn print_findings_json(
    findings: &[Finding],
    info: &ScanInfo,
    out: &mut impl Write,
) -> io::Result<()> {
    let report = JsonReport { findings, info };
    serde_json::to_writer_pretty(&mut *out, &report)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::TrailPoint;

    fn sample() -> Finding {
        Finding {
            category: "html".into(),
            file: "index.php".into(),
            line: 3,
            message: "user-controlled data reaches HTML output via echo".into(),
            caused_by: vec![
                TrailPoint {
                    file: "index.php".into(),
                    line: 1,
                },
                TrailPoint {
                    file: "index.php".into(),
                    line: 2,
                },
            ],
        }
    }

    #[test]
    fn text_output_renders_cause_chain() {
        let mut out = Vec::new();
        print_findings_text(&[sample()], &ScanInfo::default(), false, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("HTML index.php:3"));
        assert!(text.contains("caused by: (index.php:1) via (index.php:2)"));
        assert!(text.contains("1 finding(s)."));
    }

    #[test]
    fn text_output_without_findings_says_so() {
        let mut out = Vec::new();
        print_findings_text(&[], &ScanInfo::default(), false, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("No taint flows found."));
    }

    #[test]
    fn json_output_is_machine_readable() {
        let mut out = Vec::new();
        print_findings_json(&[sample()], &ScanInfo::default(), &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["findings"][0]["category"], "html");
        assert_eq!(value["findings"][0]["line"], 3);
    }

    #[test]
    fn colored_output_wraps_the_category() {
        let mut out = Vec::new();
        print_findings_text(&[sample()], &ScanInfo::default(), true, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\x1b[31mHTML\x1b[0m"));
    }
}
