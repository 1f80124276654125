//! Queue sync for subjective-dimension synthetic ids and the synthesis
//! marker.
//!
//! Unscored (placeholder) dimensions are prepended to the queue front
//! unconditionally; stale dimensions are appended only once no objective
//! items remain; `synthesis::pending` is injected whenever the open-review
//! snapshot hash changes and is only ever removed by explicit completion.

use crate::hash::short_hash;
use crate::plan::{Plan, SUBJECTIVE_PREFIX, SYNTHESIS_ID};
use crate::scoring::slugify;
use crate::state::{State, Status};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct SubjectiveSyncResult {
    pub injected: Vec<String>,
    pub pruned: Vec<String>,
}

impl SubjectiveSyncResult {
    pub fn changes(&self) -> usize {
        self.injected.len() + self.pruned.len()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SynthesisSyncResult {
    pub injected: bool,
}

pub(crate) fn current_unscored_ids(state: &State) -> BTreeSet<String> {
    state
        .subjective_assessments
        .iter()
        .filter(|(_, a)| a.placeholder)
        .map(|(dim_key, _)| format!("{SUBJECTIVE_PREFIX}{}", slugify(dim_key)))
        .collect()
}

pub(crate) fn current_stale_ids(state: &State) -> BTreeSet<String> {
    state
        .subjective_assessments
        .iter()
        .filter(|(_, a)| !a.placeholder && a.needs_review_refresh)
        .map(|(dim_key, _)| format!("{SUBJECTIVE_PREFIX}{}", slugify(dim_key)))
        .collect()
}

/// Prepend never-scored dimension ids to the queue front; prune subjective
/// ids that are neither unscored nor stale (the stale sync owns those).
pub fn sync_unscored_dimensions(plan: &mut Plan, state: &State) -> SubjectiveSyncResult {
    let mut result = SubjectiveSyncResult::default();
    let unscored = current_unscored_ids(state);
    let stale = current_stale_ids(state);

    let to_remove: Vec<String> = plan
        .queue_order
        .iter()
        .filter(|fid| {
            fid.starts_with(SUBJECTIVE_PREFIX)
                && !unscored.contains(*fid)
                && !stale.contains(*fid)
        })
        .cloned()
        .collect();
    for fid in to_remove {
        plan.queue_order.retain(|id| *id != fid);
        result.pruned.push(fid);
    }

    for uid in unscored.iter().rev() {
        if !plan.queue_order.contains(uid) {
            plan.queue_order.insert(0, uid.clone());
            result.injected.push(uid.clone());
        }
    }
    result
}

/// Append stale dimension ids once no objective items remain in the queue.
pub fn sync_stale_dimensions(plan: &mut Plan, state: &State) -> SubjectiveSyncResult {
    let mut result = SubjectiveSyncResult::default();
    let stale = current_stale_ids(state);
    let unscored = current_unscored_ids(state);

    let to_remove: Vec<String> = plan
        .queue_order
        .iter()
        .filter(|fid| {
            fid.starts_with(SUBJECTIVE_PREFIX)
                && !stale.contains(*fid)
                && !unscored.contains(*fid)
        })
        .cloned()
        .collect();
    for fid in to_remove {
        plan.queue_order.retain(|id| *id != fid);
        result.pruned.push(fid);
    }

    let has_real_items = plan
        .queue_order
        .iter()
        .any(|fid| !fid.starts_with(SUBJECTIVE_PREFIX));
    if !has_real_items && !stale.is_empty() {
        for sid in &stale {
            if !plan.queue_order.contains(sid) {
                plan.queue_order.push(sid.clone());
                result.injected.push(sid.clone());
            }
        }
    }
    result
}

/// Hash of sorted open review/concerns finding ids; empty when there are
/// none. First 16 hex chars.
pub fn review_finding_snapshot_hash(state: &State) -> String {
    let review_ids: Vec<&str> = state
        .findings
        .iter()
        .filter(|(_, f)| {
            f.status == Status::Open && (f.detector == "review" || f.detector == "concerns")
        })
        .map(|(fid, _)| fid.as_str())
        .collect();
    if review_ids.is_empty() {
        return String::new();
    }
    short_hash(review_ids.join("|").as_bytes(), 16)
}

/// Inject `synthesis::pending` at the queue front when the review snapshot
/// hash moved. Never auto-prunes.
pub fn sync_synthesis_needed(plan: &mut Plan, state: &State) -> SynthesisSyncResult {
    let mut result = SynthesisSyncResult::default();
    let current_hash = review_finding_snapshot_hash(state);
    let last_hash = &plan.epic_synthesis_meta.finding_snapshot_hash;
    let already_present = plan.queue_order.iter().any(|id| id == SYNTHESIS_ID);

    if !current_hash.is_empty() && current_hash != *last_hash && !already_present {
        plan.queue_order.insert(0, SYNTHESIS_ID.to_string());
        result.injected = true;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Confidence, SubjectiveAssessment, make_finding};
    use serde_json::Map;

    fn assessment(score: f64, placeholder: bool, stale: bool) -> SubjectiveAssessment {
        SubjectiveAssessment {
            score,
            placeholder,
            needs_review_refresh: stale,
            stale_since: None,
            reviewed_at: None,
        }
    }

    #[test]
    fn unscored_dimensions_prepend_in_sorted_order() {
        let mut state = State::default();
        state
            .subjective_assessments
            .insert("naming_quality".into(), assessment(0.0, true, false));
        state
            .subjective_assessments
            .insert("abstraction_fit".into(), assessment(0.0, true, false));
        let mut plan = Plan::default();
        plan.queue_order.push("unused::a.py::os".into());

        let result = sync_unscored_dimensions(&mut plan, &state);
        assert_eq!(result.injected.len(), 2);
        assert_eq!(
            plan.queue_order,
            vec![
                "subjective::abstraction_fit".to_string(),
                "subjective::naming_quality".to_string(),
                "unused::a.py::os".to_string(),
            ]
        );
    }

    #[test]
    fn resolved_subjective_ids_are_pruned() {
        let state = State::default();
        let mut plan = Plan::default();
        plan.queue_order.push("subjective::naming_quality".into());
        let result = sync_unscored_dimensions(&mut plan, &state);
        assert_eq!(result.pruned, vec!["subjective::naming_quality"]);
        assert!(plan.queue_order.is_empty());
    }

    #[test]
    fn stale_dimensions_wait_for_objective_items_to_drain() {
        let mut state = State::default();
        state
            .subjective_assessments
            .insert("naming_quality".into(), assessment(80.0, false, true));

        let mut plan = Plan::default();
        plan.queue_order.push("unused::a.py::os".into());
        let result = sync_stale_dimensions(&mut plan, &state);
        assert!(result.injected.is_empty());

        plan.queue_order.clear();
        let result = sync_stale_dimensions(&mut plan, &state);
        assert_eq!(result.injected, vec!["subjective::naming_quality"]);
    }

    #[test]
    fn snapshot_hash_tracks_open_review_findings() {
        let mut state = State::default();
        assert_eq!(review_finding_snapshot_hash(&state), "");

        let f = make_finding("review", ".", "abc12345", 1, Confidence::High, "x", Map::new());
        state.findings.insert(f.id.clone(), f);
        let h1 = review_finding_snapshot_hash(&state);
        assert_eq!(h1.len(), 16);

        let f2 = make_finding("concerns", ".", "def67890", 3, Confidence::Low, "y", Map::new());
        state.findings.insert(f2.id.clone(), f2);
        assert_ne!(review_finding_snapshot_hash(&state), h1);
    }

    #[test]
    fn synthesis_marker_injected_once_per_hash_change() {
        let mut state = State::default();
        let f = make_finding("review", ".", "abc12345", 1, Confidence::High, "x", Map::new());
        state.findings.insert(f.id.clone(), f);

        let mut plan = Plan::default();
        assert!(sync_synthesis_needed(&mut plan, &state).injected);
        assert_eq!(plan.queue_order[0], SYNTHESIS_ID);
        // Already present: not injected twice.
        assert!(!sync_synthesis_needed(&mut plan, &state).injected);

        // Recorded hash means no reinjection after completion-style removal.
        plan.queue_order.clear();
        plan.epic_synthesis_meta.finding_snapshot_hash = review_finding_snapshot_hash(&state);
        assert!(!sync_synthesis_needed(&mut plan, &state).injected);
    }
}
