//! Finding selection: pattern matching, resolve transitions, and the
//! display noise budget.

use crate::state::{AttestationEntry, Finding, State, Status, utc_now};
use std::collections::BTreeMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Only(Status),
}

impl StatusFilter {
    pub fn parse(token: &str) -> Option<StatusFilter> {
        if token.eq_ignore_ascii_case("all") {
            return Some(StatusFilter::All);
        }
        Status::parse(token).map(StatusFilter::Only)
    }

    pub fn matches(self, status: Status) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(wanted) => status == wanted,
        }
    }
}

fn hex_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[0-9a-f]+$").unwrap())
}

/// Pattern semantics shared by resolve/skip/show surfaces:
/// glob (`*` anywhere), exact id, hash suffix (>=8 hex chars matching the id
/// tail), id prefix (`::` in the pattern), detector name, or file/directory
/// prefix.
pub fn finding_matches_pattern(finding: &Finding, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }

    if pattern.contains('*') {
        return glob::Pattern::new(pattern)
            .map(|p| {
                p.matches(&finding.id)
                    || p.matches(&finding.file)
                    || p.matches(&finding.detector)
                    || p.matches(&finding.summary)
            })
            .unwrap_or(false);
    }

    if pattern.contains("::") {
        return finding.id == pattern || finding.id.starts_with(pattern);
    }

    let lowered = pattern.to_lowercase();
    if lowered.len() >= 8 && hex_re().is_match(&lowered) {
        return finding.id.to_lowercase().ends_with(&format!("::{lowered}"));
    }

    finding.detector == pattern
        || finding.file == pattern
        || finding
            .file
            .starts_with(&format!("{}/", pattern.trim_end_matches('/')))
}

/// Matching findings under a status filter, in deterministic id order.
pub fn match_findings<'a>(
    state: &'a State,
    pattern: &str,
    status_filter: StatusFilter,
) -> Vec<&'a Finding> {
    state
        .findings
        .values()
        .filter(|f| status_filter.matches(f.status) && finding_matches_pattern(f, pattern))
        .collect()
}

/// Transition all open findings matching `pattern` to `target_status`
/// (or reopen resolved ones when the target is `open`). Returns affected ids
/// and appends to the attestation log when an attestation was supplied.
pub fn resolve_findings(
    state: &mut State,
    pattern: &str,
    target_status: Status,
    note: Option<&str>,
    attestation: Option<&str>,
) -> Vec<String> {
    let now = utc_now();
    let mut affected: Vec<String> = vec![];

    for finding in state.findings.values_mut() {
        if !finding_matches_pattern(finding, pattern) {
            continue;
        }
        if target_status == Status::Open {
            if !finding.status.is_resolved() {
                continue;
            }
            finding.status = Status::Open;
            finding.resolved_at = None;
            finding.resolution_attestation = None;
            finding.scan_verified = false;
        } else {
            if finding.status != Status::Open {
                continue;
            }
            finding.status = target_status;
            finding.resolved_at = Some(now.clone());
            finding.scan_verified = false;
            if let Some(note) = note {
                finding.note = Some(note.to_string());
            }
            if let Some(attestation) = attestation {
                finding.resolution_attestation = Some(attestation.to_string());
            }
        }
        affected.push(finding.id.clone());
    }

    if !affected.is_empty() && attestation.is_some() {
        state.attestation_log.push(AttestationEntry {
            timestamp: now,
            command: "resolve".to_string(),
            pattern: pattern.to_string(),
            attestation: attestation.map(str::to_string),
            affected: affected.len(),
        });
    }

    affected
}

/// Cap surfaced findings per detector, then globally. Zero disables a cap.
/// Returns the surfaced subset (original order) plus hidden counts keyed by
/// detector.
pub fn apply_finding_noise_budget<'a>(
    matches: Vec<&'a Finding>,
    per_detector: usize,
    global: usize,
) -> (Vec<&'a Finding>, BTreeMap<String, usize>) {
    let mut hidden: BTreeMap<String, usize> = BTreeMap::new();
    let mut per_counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut surfaced: Vec<&Finding> = vec![];

    for finding in matches {
        let count = per_counts.entry(finding.detector.as_str()).or_insert(0);
        if per_detector > 0 && *count >= per_detector {
            *hidden.entry(finding.detector.clone()).or_insert(0) += 1;
            continue;
        }
        *count += 1;
        surfaced.push(finding);
    }

    if global > 0 && surfaced.len() > global {
        for finding in surfaced.split_off(global) {
            *hidden.entry(finding.detector.clone()).or_insert(0) += 1;
        }
    }

    (surfaced, hidden)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Confidence, make_finding};
    use serde_json::Map;

    fn seeded_state() -> State {
        let mut state = State::default();
        for (detector, file, name) in [
            ("unused", "src/a.py", "os"),
            ("unused", "src/b.py", "sys"),
            ("smells", "src/a.py", "silent_except"),
            ("review", ".", "abcdef1234567890"),
        ] {
            let f = make_finding(detector, file, name, 2, Confidence::Medium, "x", Map::new());
            state.findings.insert(f.id.clone(), f);
        }
        state
    }

    #[test]
    fn exact_id_and_prefix_match() {
        let state = seeded_state();
        assert_eq!(
            match_findings(&state, "unused::src/a.py::os", StatusFilter::All).len(),
            1
        );
        assert_eq!(match_findings(&state, "unused::src", StatusFilter::All).len(), 2);
    }

    #[test]
    fn glob_match() {
        let state = seeded_state();
        assert_eq!(match_findings(&state, "unused::*", StatusFilter::All).len(), 2);
        assert_eq!(match_findings(&state, "*silent*", StatusFilter::All).len(), 1);
    }

    #[test]
    fn hash_suffix_match() {
        let state = seeded_state();
        let matched = match_findings(&state, "abcdef1234567890", StatusFilter::All);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].detector, "review");
        // Too short to be a hash suffix; not a detector/file either.
        assert!(match_findings(&state, "abcdef1", StatusFilter::All).is_empty());
    }

    #[test]
    fn detector_and_directory_match() {
        let state = seeded_state();
        assert_eq!(match_findings(&state, "smells", StatusFilter::All).len(), 1);
        assert_eq!(match_findings(&state, "src", StatusFilter::All).len(), 3);
        assert_eq!(match_findings(&state, "src/", StatusFilter::All).len(), 3);
    }

    #[test]
    fn resolve_sets_fields_and_logs_attestation() {
        let mut state = seeded_state();
        let affected = resolve_findings(
            &mut state,
            "unused::src/a.py::os",
            Status::Fixed,
            Some("removed it"),
            Some("I have actually removed it and I am not gaming the score."),
        );
        assert_eq!(affected, vec!["unused::src/a.py::os"]);
        let f = &state.findings["unused::src/a.py::os"];
        assert_eq!(f.status, Status::Fixed);
        assert!(f.resolved_at.is_some());
        assert_eq!(f.note.as_deref(), Some("removed it"));
        assert_eq!(state.attestation_log.len(), 1);
        assert_eq!(state.attestation_log[0].affected, 1);
    }

    #[test]
    fn resolve_skips_non_open_findings() {
        let mut state = seeded_state();
        state
            .findings
            .get_mut("unused::src/a.py::os")
            .unwrap()
            .status = Status::Wontfix;
        let affected =
            resolve_findings(&mut state, "unused::src/a.py::os", Status::Fixed, None, None);
        assert!(affected.is_empty());
    }

    #[test]
    fn reopen_targets_resolved_findings_only() {
        let mut state = seeded_state();
        state
            .findings
            .get_mut("unused::src/a.py::os")
            .unwrap()
            .status = Status::Wontfix;
        let affected = resolve_findings(&mut state, "unused", Status::Open, None, None);
        assert_eq!(affected, vec!["unused::src/a.py::os"]);
        assert_eq!(state.findings["unused::src/a.py::os"].status, Status::Open);
    }

    #[test]
    fn noise_budget_caps_per_detector_then_globally() {
        let state = seeded_state();
        let all: Vec<&Finding> = state.findings.values().collect();
        let (surfaced, hidden) = apply_finding_noise_budget(all.clone(), 1, 0);
        assert_eq!(surfaced.len(), 3);
        assert_eq!(hidden.get("unused"), Some(&1));

        let (surfaced, hidden) = apply_finding_noise_budget(all, 0, 2);
        assert_eq!(surfaced.len(), 2);
        assert_eq!(hidden.values().sum::<usize>(), 2);
    }
}
