//! Cause trails: the lines a taint value travelled through.
//!
//! Append-only, de-duplicated by location, capped in length. The engine
//! snapshots the collapsed taint and links at each contributing line so a
//! finding can be rendered as a source-to-sink chain without re-running the
//! analysis.

use crate::flags::TaintFlags;
use crate::links::{FuncId, LinksSet};
use serde::{Deserialize, Serialize};

/// Trails longer than this stop accumulating; the head of the chain is the
/// interesting part.
pub const MAX_TRAIL_LINES: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausedByLine {
    pub file: String,
    pub line: usize,
    /// Collapsed taint the value carried at this line.
    pub taint: TaintFlags,
    /// Collapsed link snapshot at this line.
    pub links: LinksSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausedByLines {
    lines: Vec<CausedByLine>,
}

impl CausedByLines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CausedByLine> {
        self.lines.iter()
    }

    /// Record a contributing line. Safe snapshots are not worth a trail
    /// entry; duplicates keep their first occurrence.
    pub fn add(&mut self, file: &str, line: usize, taint: TaintFlags, links: &LinksSet) {
        if taint.is_empty() && links.is_empty() {
            return;
        }
        if self.lines.len() >= MAX_TRAIL_LINES {
            return;
        }
        if let Some(existing) = self
            .lines
            .iter_mut()
            .find(|l| l.file == file && l.line == line)
        {
            existing.taint |= taint;
            existing.links.merge_with(links);
            return;
        }
        self.lines.push(CausedByLine {
            file: file.to_string(),
            line,
            taint,
            links: links.clone(),
        });
    }

    /// Set-union preserving first occurrence.
    pub fn merge_with(&mut self, other: &CausedByLines) {
        for entry in &other.lines {
            self.add(&entry.file, entry.line, entry.taint, &entry.links);
        }
    }

    pub fn merged(mut self, other: &CausedByLines) -> Self {
        self.merge_with(other);
        self
    }

    /// Keep only the entries whose link snapshot mentions `(func, param)`.
    pub fn filtered_for(&self, func: FuncId, param: usize) -> CausedByLines {
        CausedByLines {
            lines: self
                .lines
                .iter()
                .filter(|l| l.links.mentions(func, param))
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_lines_keep_first_occurrence() {
        let mut trail = CausedByLines::new();
        trail.add("a.php", 3, TaintFlags::HTML, &LinksSet::default());
        trail.add("a.php", 5, TaintFlags::SQL, &LinksSet::default());
        trail.add("a.php", 3, TaintFlags::SQL, &LinksSet::default());
        assert_eq!(trail.len(), 2);
        let first = trail.iter().next().unwrap();
        assert_eq!(first.line, 3);
        assert!(first.taint.contains(TaintFlags::HTML | TaintFlags::SQL));
    }

    #[test]
    fn safe_snapshots_are_not_recorded() {
        let mut trail = CausedByLines::new();
        trail.add("a.php", 1, TaintFlags::SAFE, &LinksSet::default());
        assert!(trail.is_empty());
    }

    #[test]
    fn merge_is_bounded() {
        let mut trail = CausedByLines::new();
        let mut other = CausedByLines::new();
        for line in 0..2 * MAX_TRAIL_LINES {
            other.add("a.php", line, TaintFlags::HTML, &LinksSet::default());
        }
        trail.merge_with(&other);
        assert_eq!(trail.len(), MAX_TRAIL_LINES);
    }

    #[test]
    fn filter_keeps_only_mentioning_entries() {
        let mut trail = CausedByLines::new();
        trail.add("a.php", 1, TaintFlags::HTML, &LinksSet::single(FuncId(4), 0));
        trail.add("a.php", 2, TaintFlags::HTML, &LinksSet::default());
        let filtered = trail.filtered_for(FuncId(4), 0);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.iter().next().unwrap().line, 1);
    }
}
