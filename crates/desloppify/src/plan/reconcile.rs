//! Post-scan plan reconciliation: supersede ids that disappeared from state,
//! resurface stale temporary skips, prune expired tombstones.

use crate::plan::{Plan, SupersededEntry, operations::resurface_stale_skips};
use crate::state::{State, Status, utc_now};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;

pub const SUPERSEDED_TTL_DAYS: i64 = 90;
const MAX_CANDIDATES: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct ReconcileResult {
    pub superseded: Vec<String>,
    pub resurfaced: Vec<String>,
    pub pruned: Vec<String>,
    pub changes: usize,
}

fn is_finding_alive(state: &State, finding_id: &str) -> bool {
    state
        .findings
        .get(finding_id)
        .is_some_and(|f| f.status == Status::Open)
}

/// Open findings with the same detector + file, candidate remaps for a
/// disappeared id.
fn find_candidates(state: &State, detector: &str, file: &str, exclude: &str) -> Vec<String> {
    state
        .findings
        .iter()
        .filter(|(fid, f)| {
            f.status == Status::Open
                && f.detector == detector
                && f.file == file
                && fid.as_str() != exclude
        })
        .map(|(fid, _)| fid.clone())
        .take(MAX_CANDIDATES)
        .collect()
}

fn supersede_id(plan: &mut Plan, state: &State, finding_id: &str, now: &str) {
    let (detector, file, summary) = state
        .findings
        .get(finding_id)
        .map(|f| (f.detector.clone(), f.file.clone(), f.summary.clone()))
        .unwrap_or_default();

    let candidates = if detector.is_empty() {
        vec![]
    } else {
        find_candidates(state, &detector, &file, finding_id)
    };

    let note = plan
        .overrides
        .get(finding_id)
        .and_then(|o| o.note.clone());

    plan.superseded.insert(
        finding_id.to_string(),
        SupersededEntry {
            original_id: finding_id.to_string(),
            original_detector: detector,
            original_file: file,
            original_summary: summary,
            status: "superseded".to_string(),
            superseded_at: now.to_string(),
            remapped_to: None,
            candidates,
            note,
        },
    );

    plan.queue_order.retain(|id| id != finding_id);
    plan.skipped.remove(finding_id);
    for cluster in plan.clusters.values_mut() {
        cluster.finding_ids.retain(|id| id != finding_id);
    }
}

fn prune_old_superseded(plan: &mut Plan, now: DateTime<Utc>) -> Vec<String> {
    let cutoff = now - Duration::days(SUPERSEDED_TTL_DAYS);
    let to_prune: Vec<String> = plan
        .superseded
        .iter()
        .filter(|(_, entry)| {
            match DateTime::parse_from_rfc3339(&entry.superseded_at) {
                Ok(ts) => ts.with_timezone(&Utc) < cutoff,
                // Unparseable timestamps are treated as expired.
                Err(_) => true,
            }
        })
        .map(|(fid, _)| fid.clone())
        .collect();

    for fid in &to_prune {
        plan.superseded.remove(fid);
        plan.overrides.remove(fid);
    }
    to_prune
}

/// Reconcile the plan against fresh post-scan state.
pub fn reconcile_plan_after_scan(plan: &mut Plan, state: &State) -> ReconcileResult {
    let mut result = ReconcileResult::default();
    let now = utc_now();

    let mut referenced: BTreeSet<String> = BTreeSet::new();
    referenced.extend(plan.queue_order.iter().cloned());
    referenced.extend(plan.skipped.keys().cloned());
    referenced.extend(plan.overrides.keys().cloned());
    for cluster in plan.clusters.values() {
        referenced.extend(cluster.finding_ids.iter().cloned());
    }
    // Synthetic ids are managed by the subjective/synthesis syncs, and
    // already-superseded ids stay where they are.
    referenced.retain(|fid| !Plan::is_synthetic_id(fid) && !plan.superseded.contains_key(fid));

    for fid in referenced {
        if !is_finding_alive(state, &fid) {
            supersede_id(plan, state, &fid, &now);
            result.superseded.push(fid);
            result.changes += 1;
        }
    }

    let resurfaced = resurface_stale_skips(plan, state.scan_count);
    result.changes += resurfaced.len();
    result.resurfaced = resurfaced;

    let pruned = prune_old_superseded(plan, Utc::now());
    result.changes += pruned.len();
    result.pruned = pruned;

    result
}
