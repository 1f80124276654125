//! Ignore-pattern suppression. Suppressed findings stay in the store, stay
//! open, and keep counting against strict and verified scores.

use crate::state::matching::finding_matches_pattern;
use crate::state::{State, Status};

#[derive(Debug, Clone, Default)]
pub struct SuppressionSummary {
    pub suppressed: Vec<String>,
    pub unsuppressed: Vec<String>,
    /// Patterns that failed to apply (bad globs). Best-effort: reported, not
    /// fatal.
    pub failed_patterns: Vec<String>,
}

/// Recompute the `suppressed` flag on every open finding from the config
/// ignore list. Non-open findings never carry the flag.
pub fn sync_suppressions(state: &mut State, ignore_patterns: &[String]) -> SuppressionSummary {
    let mut summary = SuppressionSummary::default();
    for pattern in ignore_patterns {
        if pattern.contains('*') && glob::Pattern::new(pattern).is_err() {
            summary.failed_patterns.push(pattern.clone());
        }
    }

    for finding in state.findings.values_mut() {
        let should_suppress = finding.status == Status::Open
            && ignore_patterns
                .iter()
                .any(|p| finding_matches_pattern(finding, p));
        if should_suppress && !finding.suppressed {
            finding.suppressed = true;
            summary.suppressed.push(finding.id.clone());
        } else if !should_suppress && finding.suppressed {
            finding.suppressed = false;
            summary.unsuppressed.push(finding.id.clone());
        }
    }
    summary
}
