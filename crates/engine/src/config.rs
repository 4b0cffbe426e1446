//! Analyzer configuration.
//!
//! Threaded explicitly through the analyzer constructor; there is no global
//! configuration state.

use crate::Finding;
use std::sync::Arc;

/// Hook deciding whether a would-be finding is a known false positive.
pub type FalsePositiveHook = Arc<dyn Fn(&Finding) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct AnalyzerConfig {
    /// Display names for the two plugin-defined categories.
    pub custom1_name: String,
    pub custom2_name: String,
    /// Upper bound on fixpoint passes. Contracts are monotone, so this is a
    /// defensive cap, not a correctness requirement.
    pub max_passes: usize,
    /// Returns `true` to suppress a finding.
    pub false_positive_hook: Option<FalsePositiveHook>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            custom1_name: "custom1".into(),
            custom2_name: "custom2".into(),
            max_passes: 8,
            false_positive_hook: None,
        }
    }
}

impl std::fmt::Debug for AnalyzerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyzerConfig")
            .field("custom1_name", &self.custom1_name)
            .field("custom2_name", &self.custom2_name)
            .field("max_passes", &self.max_passes)
            .field(
                "false_positive_hook",
                &self.false_positive_hook.as_ref().map(|_| "…"),
            )
            .finish()
    }
}
