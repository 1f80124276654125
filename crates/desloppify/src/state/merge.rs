//! Scan-result merging: identity-preserving inserts, reopen tracking, and
//! auto-resolution of findings the detectors no longer see.

use crate::state::{Finding, State, Status, utc_now};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct MergeSummary {
    pub new: Vec<String>,
    pub reopened: Vec<String>,
    pub refreshed: usize,
    pub auto_resolved: Vec<String>,
    pub verified: Vec<String>,
}

impl MergeSummary {
    pub fn changes(&self) -> usize {
        self.new.len() + self.reopened.len() + self.auto_resolved.len() + self.verified.len()
    }
}

fn within_scan_root(file: &str, scan_root: Option<&str>) -> bool {
    match scan_root.map(|p| p.trim_end_matches('/')).filter(|p| !p.is_empty() && *p != ".") {
        None => true,
        Some(root) => file == root || file.starts_with(&format!("{root}/")),
    }
}

/// Merge one scan's detector output into the store.
///
/// - unknown id: inserted as open;
/// - known, previously non-open, seen open again: reopened, `reopen_count`
///   incremented;
/// - known and open: `detail`/`summary`/`tier`/`confidence` refreshed, status
///   untouched.
///
/// Findings from detectors that ran but no longer emit them auto-resolve with
/// `scan_verified = true`; manually fixed findings that stay gone become
/// verified. Idempotent: replaying identical output changes nothing.
pub fn merge_scan_results(
    state: &mut State,
    new_findings: Vec<Finding>,
    ran_detectors: &BTreeSet<String>,
    scan_root: Option<&str>,
) -> MergeSummary {
    let mut summary = MergeSummary::default();
    let now = utc_now();
    let seen: BTreeSet<String> = new_findings.iter().map(|f| f.id.clone()).collect();

    for incoming in new_findings {
        match state.findings.get_mut(&incoming.id) {
            None => {
                summary.new.push(incoming.id.clone());
                state.findings.insert(incoming.id.clone(), incoming);
            }
            Some(existing) if existing.status.is_resolved() => {
                existing.status = Status::Open;
                existing.reopen_count += 1;
                existing.detail = incoming.detail;
                existing.summary = incoming.summary;
                existing.tier = incoming.tier;
                existing.confidence = incoming.confidence;
                existing.scan_verified = false;
                existing.resolved_at = None;
                summary.reopened.push(existing.id.clone());
            }
            Some(existing) => {
                existing.detail = incoming.detail;
                existing.summary = incoming.summary;
                existing.tier = incoming.tier;
                existing.confidence = incoming.confidence;
                summary.refreshed += 1;
            }
        }
    }

    for finding in state.findings.values_mut() {
        if !ran_detectors.contains(&finding.detector) {
            continue;
        }
        if !within_scan_root(&finding.file, scan_root) {
            continue;
        }
        if seen.contains(&finding.id) {
            continue;
        }
        match finding.status {
            Status::Open => {
                finding.status = Status::AutoResolved;
                finding.resolved_at = Some(now.clone());
                finding.scan_verified = true;
                summary.auto_resolved.push(finding.id.clone());
            }
            Status::Fixed if !finding.scan_verified => {
                finding.scan_verified = true;
                summary.verified.push(finding.id.clone());
            }
            _ => {}
        }
    }

    summary
}
