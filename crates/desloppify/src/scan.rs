//! Scan orchestration: walk the tree, run detectors, merge into the finding
//! store, recompute scores, reconcile the plan, regenerate clusters, and
//! commit both stores as one transaction.

use crate::detectors::{self, DetectorOptions, LoadedFile};
use crate::errors::CommandError;
use crate::paths::collect_source_files;
use crate::plan::{
    self, Plan, auto_cluster_findings, reconcile_plan_after_scan, sync_stale_dimensions,
    sync_synthesis_needed, sync_unscored_dimensions,
};
use crate::runtime::Runtime;
use crate::scoring::{ScoreSnapshot, refresh_dimension_scores, score_snapshot};
use crate::state::{
    Finding, State, Status, SubjectiveAssessment, make_finding, merge_scan_results,
    sync_suppressions, utc_now,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub files_scanned: usize,
    pub new_findings: Vec<String>,
    pub reopened: Vec<String>,
    pub auto_resolved: Vec<String>,
    pub superseded: Vec<String>,
    pub resurfaced: Vec<String>,
    pub pruned: Vec<String>,
    pub clusters_changed: usize,
    pub prev_scores: ScoreSnapshot,
    pub scores: ScoreSnapshot,
    pub suppressed: usize,
    pub warnings: Vec<String>,
}

fn load_files(rt: &Runtime, scan_root: &Path) -> Result<Vec<LoadedFile>, CommandError> {
    let sources = collect_source_files(&rt.root, scan_root, &rt.config)
        .map_err(CommandError::validation)?;
    let mut loaded = vec![];
    for source in sources {
        // Unreadable files are skipped, not fatal; the walk already proved
        // they exist.
        let Ok(text) = std::fs::read_to_string(&source.path) else {
            continue;
        };
        loaded.push(LoadedFile {
            rel: source.rel,
            zone: source.zone,
            text,
        });
    }
    Ok(loaded)
}

fn run_detectors(
    files: &[LoadedFile],
    options: &DetectorOptions,
) -> (Vec<Finding>, BTreeMap<&'static str, usize>, BTreeSet<String>) {
    let mut findings = vec![];
    let mut scanned_by_detector: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut ran: BTreeSet<String> = BTreeSet::new();

    for (name, detect) in detectors::scan_registry() {
        let (entries, scanned) = detect(files, options);
        scanned_by_detector.insert(*name, scanned);
        ran.insert(name.to_string());
        for entry in entries {
            findings.push(make_finding(
                name,
                &entry.file,
                &entry.name,
                entry.tier,
                entry.confidence,
                entry.summary,
                entry.detail,
            ));
        }
    }
    (findings, scanned_by_detector, ran)
}

/// Seed placeholder assessments for configured review dimensions so the
/// initial-review machinery has something to point at.
fn seed_review_dimensions(state: &mut State, dimensions: &[String]) {
    for dim_key in dimensions {
        state
            .subjective_assessments
            .entry(dim_key.clone())
            .or_insert_with(|| SubjectiveAssessment {
                score: 0.0,
                placeholder: true,
                needs_review_refresh: false,
                stale_since: None,
                reviewed_at: None,
            });
    }
}

fn capture_dimension_checks(state: &mut State, scanned: &BTreeMap<&'static str, usize>) {
    let mut checks_by_dim: BTreeMap<&'static str, usize> = BTreeMap::new();
    for (detector, count) in scanned {
        if let Some(meta) = detectors::lookup(detector)
            && !meta.dimension.is_empty()
        {
            *checks_by_dim.entry(meta.dimension).or_insert(0) += count;
        }
    }
    for (dimension, checks) in checks_by_dim {
        state
            .dimension_scores
            .entry(dimension.to_string())
            .or_default()
            .checks = checks;
    }
}

/// Append open findings the plan does not know about yet, ordered by tier
/// then id.
fn inject_new_queue_ids(plan: &mut Plan, state: &State) -> usize {
    let known: BTreeSet<&String> = plan
        .queue_order
        .iter()
        .chain(plan.skipped.keys())
        .collect();
    let mut fresh: Vec<(&String, u8)> = state
        .findings
        .iter()
        .filter(|(fid, f)| {
            f.status == Status::Open && !f.suppressed && !known.contains(fid)
        })
        .map(|(fid, f)| (fid, f.tier))
        .collect();
    fresh.sort_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)));
    let count = fresh.len();
    plan.queue_order
        .extend(fresh.into_iter().map(|(fid, _)| fid.clone()));
    count
}

/// Run the full scan pipeline against `path_arg` (repo-relative subtree, or
/// the whole tree) and commit both stores.
pub fn run_scan(
    rt: &Runtime,
    state: &mut State,
    plan: &mut Plan,
    path_arg: Option<&str>,
) -> Result<ScanSummary, CommandError> {
    let scan_root = match path_arg {
        Some(p) => rt.root.join(p),
        None => rt.root.clone(),
    };
    if !scan_root.is_dir() {
        return Err(CommandError::validation(format!(
            "Scan path is not a directory: {}",
            scan_root.display()
        )));
    }
    let scan_path = path_arg
        .map(|p| p.trim_end_matches('/').replace('\\', "/"))
        .filter(|p| !p.is_empty() && p != ".");

    let mut summary = ScanSummary {
        prev_scores: score_snapshot(state),
        ..ScanSummary::default()
    };

    let files = load_files(rt, &scan_root)?;
    summary.files_scanned = files.len();

    let options = DetectorOptions {
        large_files_threshold: rt.config.large_files_threshold.max(0) as usize,
    };
    let (findings, scanned_by_detector, ran) = run_detectors(&files, &options);

    let merge = merge_scan_results(state, findings, &ran, scan_path.as_deref());
    summary.new_findings = merge.new;
    summary.reopened = merge.reopened;
    summary.auto_resolved = merge.auto_resolved;

    let suppression = sync_suppressions(state, &rt.config.ignore);
    for pattern in suppression.failed_patterns {
        summary
            .warnings
            .push(format!("ignore pattern failed to apply: {pattern}"));
    }

    state.scan_count += 1;
    state.last_scan = Some(utc_now());
    state.scan_path = scan_path.clone();
    let current_tool_hash = detectors::tool_hash();
    if let Some(previous) = &state.tool_hash
        && *previous != current_tool_hash
    {
        summary
            .warnings
            .push("detector tooling changed since last scan; scores may shift".to_string());
    }
    state.tool_hash = Some(current_tool_hash);

    seed_review_dimensions(state, &rt.config.review_dimensions);
    capture_dimension_checks(state, &scanned_by_detector);
    refresh_dimension_scores(state);

    let reconcile = reconcile_plan_after_scan(plan, state);
    summary.superseded = reconcile.superseded;
    summary.resurfaced = reconcile.resurfaced;
    summary.pruned = reconcile.pruned;

    inject_new_queue_ids(plan, state);
    sync_unscored_dimensions(plan, state);
    sync_stale_dimensions(plan, state);
    sync_synthesis_needed(plan, state);
    summary.clusters_changed = auto_cluster_findings(plan, state);

    summary.scores = score_snapshot(state);
    summary.suppressed = state.findings.values().filter(|f| f.suppressed).count();
    plan::refresh_plan_cycle(plan, summary.scores);

    rt.commit(Some(state), Some(plan))?;
    Ok(summary)
}
