//! Synthesis: the gated OBSERVE -> REFLECT -> ORGANIZE -> COMMIT workflow
//! that turns raw review findings into an ordered meta-plan, plus the epic
//! application path.
//!
//! Stage gates validate plan-data enrichment, not just text, so the flow
//! cannot be cleared by pasting filler.

use crate::errors::CommandError;
use crate::plan::{
    Cluster, EPIC_PREFIX, Plan, SYNTHESIS_ID, SkipEntry, SkipKind, StageRecord,
    subjective_sync::review_finding_snapshot_hash,
};
use crate::state::{Finding, State, Status, utc_now};
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

pub const VALID_EPIC_DIRECTIONS: [&str; 8] = [
    "delete", "merge", "flatten", "enforce", "simplify", "decompose", "extract", "inline",
];

const STRATEGY_MIN_CHARS: usize = 200;
const REPORT_MIN_CHARS: usize = 100;
const SMALL_SET_REPORT_MIN_CHARS: usize = 50;
const CONFIRM_NOTE_MIN_CHARS: usize = 100;

// --- Input collection -------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SynthesisInput {
    /// Open review/concerns findings.
    pub open_findings: BTreeMap<String, Finding>,
    pub new_since_last: BTreeSet<String>,
    pub resolved_since_last: BTreeSet<String>,
    /// Full finding objects for resolved-since-last ids.
    pub resolved_findings: BTreeMap<String, Finding>,
    pub existing_epics: Vec<String>,
    pub next_version: u32,
}

fn is_review_detector(detector: &str) -> bool {
    detector == "review" || detector == "concerns"
}

pub fn collect_synthesis_input(plan: &Plan, state: &State) -> SynthesisInput {
    let open_findings: BTreeMap<String, Finding> = state
        .findings
        .iter()
        .filter(|(_, f)| f.status == Status::Open && is_review_detector(&f.detector))
        .map(|(fid, f)| (fid.clone(), f.clone()))
        .collect();

    let synthesized: BTreeSet<String> = plan
        .epic_synthesis_meta
        .synthesized_ids
        .iter()
        .cloned()
        .collect();
    let current: BTreeSet<String> = open_findings.keys().cloned().collect();
    let new_since_last: BTreeSet<String> = current.difference(&synthesized).cloned().collect();
    let resolved_since_last: BTreeSet<String> =
        synthesized.difference(&current).cloned().collect();

    let resolved_findings = resolved_since_last
        .iter()
        .filter_map(|fid| state.findings.get(fid).map(|f| (fid.clone(), f.clone())))
        .collect();

    SynthesisInput {
        open_findings,
        new_since_last,
        resolved_since_last,
        resolved_findings,
        existing_epics: plan.epics().map(|(name, _)| name.clone()).collect(),
        next_version: plan.epic_synthesis_meta.version + 1,
    }
}

// --- Recurring patterns & citations ----------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RecurringPattern {
    pub open: Vec<String>,
    pub resolved: Vec<String>,
}

/// Dimensions present in both the resolved and the open review sets signal a
/// loop: similar issues keep coming back after fixes.
pub fn detect_recurring_patterns(
    open_findings: &BTreeMap<String, Finding>,
    resolved_findings: &BTreeMap<String, Finding>,
) -> BTreeMap<String, RecurringPattern> {
    let mut open_by_dim: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (fid, f) in open_findings {
        if let Some(dim) = f.dimension_key().filter(|d| !d.is_empty()) {
            open_by_dim.entry(dim).or_default().push(fid.clone());
        }
    }
    let mut resolved_by_dim: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (fid, f) in resolved_findings {
        if let Some(dim) = f.dimension_key().filter(|d| !d.is_empty()) {
            resolved_by_dim.entry(dim).or_default().push(fid.clone());
        }
    }

    let mut recurring = BTreeMap::new();
    for (dim, open) in open_by_dim {
        if let Some(resolved) = resolved_by_dim.remove(&dim) {
            recurring.insert(dim, RecurringPattern { open, resolved });
        }
    }
    recurring
}

fn citation_res() -> &'static (Regex, Regex) {
    static RES: OnceLock<(Regex, Regex)> = OnceLock::new();
    RES.get_or_init(|| {
        (
            Regex::new(r"[a-z_]+::[^\s,;]+").unwrap(),
            Regex::new(r"[0-9a-f]{8,}").unwrap(),
        )
    })
}

/// Finding ids cited in free text: full ids, or bare >=8-char hex suffixes
/// that correspond to a known finding.
pub fn extract_finding_citations(text: &str, valid_ids: &BTreeSet<String>) -> BTreeSet<String> {
    let (full_re, hex_re) = citation_res();
    let mut cited = BTreeSet::new();
    for m in full_re.find_iter(text) {
        let candidate = m.as_str().trim_end_matches(['.', ')', ']']);
        if valid_ids.contains(candidate) {
            cited.insert(candidate.to_string());
        }
    }
    for m in hex_re.find_iter(text) {
        let suffix = format!("::{}", m.as_str());
        if let Some(full) = valid_ids.iter().find(|id| id.ends_with(&suffix)) {
            cited.insert(full.clone());
        }
    }
    cited
}

// --- Stage helpers ----------------------------------------------------------

fn require_pending(plan: &Plan, verb: &str) -> Result<(), CommandError> {
    if plan.queue_order.iter().any(|id| id == SYNTHESIS_ID) {
        Ok(())
    } else {
        Err(CommandError::referential(format!(
            "{SYNTHESIS_ID} is not in the queue — nothing to {verb}."
        )))
    }
}

fn report_min_chars(finding_count: usize) -> usize {
    if finding_count <= 3 {
        SMALL_SET_REPORT_MIN_CHARS
    } else {
        REPORT_MIN_CHARS
    }
}

fn manual_clusters_with_findings(plan: &Plan) -> Vec<String> {
    plan.clusters
        .iter()
        .filter(|(_, c)| !c.auto && !c.finding_ids.is_empty())
        .map(|(name, _)| name.clone())
        .collect()
}

/// Manual clusters still missing a description or action steps.
fn unenriched_clusters(plan: &Plan) -> Vec<(String, Vec<&'static str>)> {
    let mut gaps = vec![];
    for (name, cluster) in &plan.clusters {
        if cluster.auto || cluster.finding_ids.is_empty() {
            continue;
        }
        let mut missing = vec![];
        if cluster.description.as_deref().unwrap_or("").is_empty() {
            missing.push("description");
        }
        if cluster.action_steps.is_empty() {
            missing.push("action_steps");
        }
        if !missing.is_empty() {
            gaps.push((name.clone(), missing));
        }
    }
    gaps
}

/// (organized, total) coverage of queued findings by clusters.
fn synthesis_coverage(plan: &Plan) -> (usize, usize) {
    let clustered: BTreeSet<&String> = plan
        .clusters
        .values()
        .flat_map(|c| c.finding_ids.iter())
        .collect();
    let queue_ids: Vec<&String> = plan
        .queue_order
        .iter()
        .filter(|fid| fid.as_str() != SYNTHESIS_ID)
        .collect();
    let organized = queue_ids.iter().filter(|fid| clustered.contains(*fid)).count();
    (organized, queue_ids.len())
}

#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: &'static str,
    pub finding_count: usize,
    pub recurring_dimensions: Vec<String>,
    pub cited_ids: Vec<String>,
}

fn record_stage(plan: &mut Plan, outcome: &StageOutcome, report: &str) {
    plan.epic_synthesis_meta.synthesis_stages.insert(
        outcome.stage.to_string(),
        StageRecord {
            stage: outcome.stage.to_string(),
            report: report.to_string(),
            cited_ids: outcome.cited_ids.clone(),
            timestamp: utc_now(),
            finding_count: outcome.finding_count,
            recurring_dimensions: outcome.recurring_dimensions.clone(),
        },
    );
}

// --- Stages -----------------------------------------------------------------

/// OBSERVE: a genuine analysis of themes and root causes. No citation gate,
/// only substance length.
pub fn record_observe(
    plan: &mut Plan,
    state: &State,
    report: &str,
) -> Result<StageOutcome, CommandError> {
    require_pending(plan, "observe")?;
    let si = collect_synthesis_input(plan, state);
    let finding_count = si.open_findings.len();

    if finding_count > 0 {
        let min_chars = report_min_chars(finding_count);
        if report.len() < min_chars {
            return Err(CommandError::validation(format!(
                "Report too short: {} chars (minimum {min_chars}). Describe themes, root causes, \
contradictions, and how findings relate.",
                report.len()
            )));
        }
    }

    let valid_ids: BTreeSet<String> = si.open_findings.keys().cloned().collect();
    let outcome = StageOutcome {
        stage: "observe",
        finding_count,
        recurring_dimensions: vec![],
        cited_ids: extract_finding_citations(report, &valid_ids)
            .into_iter()
            .collect(),
    };
    record_stage(plan, &outcome, report);
    Ok(outcome)
}

/// REFLECT: compare current findings against completed work. When recurring
/// dimensions exist, the report must name at least one.
pub fn record_reflect(
    plan: &mut Plan,
    state: &State,
    report: &str,
) -> Result<StageOutcome, CommandError> {
    require_pending(plan, "reflect on")?;
    if !plan.epic_synthesis_meta.synthesis_stages.contains_key("observe") {
        return Err(CommandError::validation(
            "Cannot reflect: observe stage not complete.",
        ));
    }

    let si = collect_synthesis_input(plan, state);
    let finding_count = si.open_findings.len();
    let min_chars = report_min_chars(finding_count);
    if report.len() < min_chars {
        return Err(CommandError::validation(format!(
            "Report too short: {} chars (minimum {min_chars}). Describe how current findings \
relate to previously completed work.",
            report.len()
        )));
    }

    let recurring = detect_recurring_patterns(&si.open_findings, &si.resolved_findings);
    let recurring_dims: Vec<String> = recurring.keys().cloned().collect();
    if !recurring_dims.is_empty() {
        let report_lower = report.to_lowercase();
        let mentioned = recurring_dims
            .iter()
            .any(|dim| report_lower.contains(&dim.to_lowercase()));
        if !mentioned {
            let summary: Vec<String> = recurring
                .iter()
                .map(|(dim, info)| {
                    format!(
                        "{dim}: {} resolved, {} still open",
                        info.resolved.len(),
                        info.open.len()
                    )
                })
                .collect();
            return Err(CommandError::validation(format!(
                "Recurring patterns detected but not addressed in report ({}). Your report must \
mention at least one recurring dimension name.",
                summary.join("; ")
            )));
        }
    }

    let outcome = StageOutcome {
        stage: "reflect",
        finding_count,
        recurring_dimensions: recurring_dims,
        cited_ids: vec![],
    };
    record_stage(plan, &outcome, report);
    Ok(outcome)
}

/// ORGANIZE: validates that the plan itself was enriched: every manual
/// cluster with members needs a description and action steps.
pub fn record_organize(
    plan: &mut Plan,
    _state: &State,
    report: &str,
) -> Result<StageOutcome, CommandError> {
    require_pending(plan, "organize")?;
    let stages = &plan.epic_synthesis_meta.synthesis_stages;
    if !stages.contains_key("observe") {
        return Err(CommandError::validation(
            "Cannot organize: observe stage not complete.",
        ));
    }
    if !stages.contains_key("reflect") {
        return Err(CommandError::validation(
            "Cannot organize: reflect stage not complete.",
        ));
    }

    let manual = manual_clusters_with_findings(plan);
    if manual.is_empty() {
        let any_with_findings = plan
            .clusters
            .values()
            .any(|c| !c.finding_ids.is_empty());
        let hint = if any_with_findings {
            "only auto-clusters exist; create manual clusters that group findings by root cause"
        } else {
            "no clusters with findings exist"
        };
        return Err(CommandError::validation(format!(
            "Cannot organize: {hint}."
        )));
    }

    let gaps = unenriched_clusters(plan);
    if !gaps.is_empty() {
        let detail: Vec<String> = gaps
            .iter()
            .map(|(name, missing)| format!("{name}: missing {}", missing.join(", ")))
            .collect();
        return Err(CommandError::validation(format!(
            "Cannot organize: {} cluster(s) need enrichment ({}).",
            gaps.len(),
            detail.join("; ")
        )));
    }

    if report.len() < REPORT_MIN_CHARS {
        return Err(CommandError::validation(format!(
            "Report too short: {} chars (minimum {REPORT_MIN_CHARS}). Explain what you organized, \
your priorities, and focus order.",
            report.len()
        )));
    }

    let outcome = StageOutcome {
        stage: "organize",
        finding_count: manual.len(),
        recurring_dimensions: vec![],
        cited_ids: vec![],
    };
    record_stage(plan, &outcome, report);
    Ok(outcome)
}

// --- Completion -------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub organized: usize,
    pub total: usize,
    pub cluster_count: usize,
    pub strategy_summary: String,
    pub unorganized_warning: Option<String>,
}

fn validate_strategy(plan: &Plan, strategy: &str) -> Result<(), CommandError> {
    let trimmed = strategy.trim();
    if trimmed.eq_ignore_ascii_case("same") {
        if plan.epic_synthesis_meta.strategy_summary.is_empty() {
            return Err(CommandError::validation(
                "--strategy \"same\" requires a previously completed synthesis.",
            ));
        }
        return Ok(());
    }
    if trimmed.len() < STRATEGY_MIN_CHARS {
        return Err(CommandError::validation(format!(
            "Strategy too short: {} chars (minimum {STRATEGY_MIN_CHARS}). Describe execution \
order, what each cluster accomplishes, and how to verify the work.",
            trimmed.len()
        )));
    }
    Ok(())
}

fn apply_completion(plan: &mut Plan, state: &State, strategy: &str) -> CompletionOutcome {
    let (organized, total) = synthesis_coverage(plan);
    let cluster_count = plan
        .clusters
        .values()
        .filter(|c| !c.finding_ids.is_empty())
        .count();

    plan.queue_order.retain(|id| id != SYNTHESIS_ID);

    let meta = &mut plan.epic_synthesis_meta;
    meta.finding_snapshot_hash = review_finding_snapshot_hash(state);
    if !strategy.trim().eq_ignore_ascii_case("same") {
        meta.strategy_summary = strategy.trim().to_string();
    }
    meta.trigger = Some("manual_synthesis".to_string());
    meta.last_completed_at = Some(utc_now());
    meta.synthesis_stages.clear();

    let unorganized_warning = if total > 0 && organized < total {
        Some(format!(
            "{}/{total} findings are not yet in any cluster.",
            total - organized
        ))
    } else {
        None
    };

    CompletionOutcome {
        organized,
        total,
        cluster_count,
        strategy_summary: plan.epic_synthesis_meta.strategy_summary.clone(),
        unorganized_warning,
    }
}

/// COMMIT: requires the organize stage, re-validates every organize gate
/// (a hand-edited plan.json cannot bypass them), and a substantive strategy.
pub fn complete_synthesis(
    plan: &mut Plan,
    state: &State,
    strategy: &str,
) -> Result<CompletionOutcome, CommandError> {
    require_pending(plan, "complete")?;
    let stages = &plan.epic_synthesis_meta.synthesis_stages;
    if !stages.contains_key("organize") {
        if !stages.contains_key("observe") {
            return Err(CommandError::validation(
                "Cannot complete: no stages done yet. Start with --stage observe.",
            ));
        }
        return Err(CommandError::validation(
            "Cannot complete: organize stage not done.",
        ));
    }

    let manual = manual_clusters_with_findings(plan);
    if manual.is_empty()
        && !plan.clusters.values().any(|c| !c.finding_ids.is_empty())
    {
        return Err(CommandError::validation(
            "Cannot complete: no clusters with findings exist.",
        ));
    }
    let gaps = unenriched_clusters(plan);
    if !gaps.is_empty() {
        return Err(CommandError::validation(format!(
            "Cannot complete: {} cluster(s) still need enrichment.",
            gaps.len()
        )));
    }

    let (organized, total) = synthesis_coverage(plan);
    if total > 0 && organized == 0 {
        return Err(CommandError::validation(
            "Cannot complete: no findings have been organized into clusters.",
        ));
    }

    validate_strategy(plan, strategy)?;
    Ok(apply_completion(plan, state, strategy))
}

/// Fast path: confirm a previously synthesized plan is still valid. Requires
/// observe + reflect, a prior strategy, enriched clusters, and a note citing
/// at least one new-since-last finding when any exist.
pub fn confirm_existing_synthesis(
    plan: &mut Plan,
    state: &State,
    note: &str,
    strategy: &str,
) -> Result<CompletionOutcome, CommandError> {
    require_pending(plan, "confirm")?;
    let stages = &plan.epic_synthesis_meta.synthesis_stages;
    if !stages.contains_key("observe") {
        return Err(CommandError::validation(
            "Cannot confirm existing: observe stage not complete. You must read findings first.",
        ));
    }
    if !stages.contains_key("reflect") {
        return Err(CommandError::validation(
            "Cannot confirm existing: reflect stage not complete. You must compare against \
completed work first.",
        ));
    }
    if plan.epic_synthesis_meta.strategy_summary.is_empty() {
        return Err(CommandError::validation(
            "Cannot confirm existing: no prior synthesis has been completed. The full \
observe/reflect/organize/commit flow is required the first time.",
        ));
    }
    let clusters_with_findings = manual_clusters_with_findings(plan);
    if clusters_with_findings.is_empty() {
        return Err(CommandError::validation(
            "Cannot confirm existing: no clusters with findings exist. Use the full organize \
flow instead.",
        ));
    }
    if note.len() < CONFIRM_NOTE_MIN_CHARS {
        return Err(CommandError::validation(format!(
            "Note too short: {} chars (minimum {CONFIRM_NOTE_MIN_CHARS}). Explain why the \
existing plan is still valid.",
            note.len()
        )));
    }
    validate_strategy(plan, strategy)?;

    let si = collect_synthesis_input(plan, state);
    if !si.new_since_last.is_empty() {
        let valid_ids: BTreeSet<String> = si.open_findings.keys().cloned().collect();
        let cited = extract_finding_citations(note, &valid_ids);
        if cited.is_disjoint(&si.new_since_last) {
            return Err(CommandError::validation(format!(
                "Note must cite at least 1 new/changed finding ({} new since last synthesis).",
                si.new_since_last.len()
            )));
        }
    }

    let outcome = StageOutcome {
        stage: "organize",
        finding_count: clusters_with_findings.len(),
        recurring_dimensions: vec![],
        cited_ids: vec![],
    };
    record_stage(plan, &outcome, &format!("[confirmed-existing] {note}"));
    Ok(apply_completion(plan, state, strategy))
}

// --- Dashboard --------------------------------------------------------------

#[derive(Debug, Clone, serde::Serialize, schemars::JsonSchema)]
pub struct SynthesisStatus {
    pub open_review_findings: usize,
    pub existing_epics: Vec<String>,
    pub new_since_last: usize,
    pub resolved_since_last: usize,
    pub stages_done: Vec<String>,
    pub next_stage: String,
    pub recurring_dimensions: Vec<String>,
    pub unenriched_clusters: Vec<String>,
    pub strategy_summary: String,
}

pub fn synthesis_status(plan: &Plan, state: &State) -> SynthesisStatus {
    let si = collect_synthesis_input(plan, state);
    let stages = &plan.epic_synthesis_meta.synthesis_stages;
    let next_stage = if !stages.contains_key("observe") {
        "observe"
    } else if !stages.contains_key("reflect") {
        "reflect"
    } else if !stages.contains_key("organize") {
        "organize"
    } else {
        "complete"
    };
    let recurring = detect_recurring_patterns(&si.open_findings, &si.resolved_findings);

    SynthesisStatus {
        open_review_findings: si.open_findings.len(),
        existing_epics: si.existing_epics.clone(),
        new_since_last: si.new_since_last.len(),
        resolved_since_last: si.resolved_since_last.len(),
        stages_done: stages.keys().cloned().collect(),
        next_stage: next_stage.to_string(),
        recurring_dimensions: recurring.keys().cloned().collect(),
        unenriched_clusters: unenriched_clusters(plan)
            .into_iter()
            .map(|(name, _)| name)
            .collect(),
        strategy_summary: plan.epic_synthesis_meta.strategy_summary.clone(),
    }
}

// --- Epic application -------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct EpicSpec {
    pub name: String,
    #[serde(default)]
    pub thesis: String,
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub finding_ids: Vec<String>,
    #[serde(default)]
    pub dismissed: Vec<String>,
    #[serde(default)]
    pub agent_safe: bool,
    #[serde(default = "crate::plan::default_dependency_order")]
    pub dependency_order: u32,
    #[serde(default)]
    pub action_steps: Vec<String>,
    #[serde(default = "crate::plan::default_cluster_status")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisResult {
    #[serde(default)]
    pub strategy_summary: String,
    #[serde(default)]
    pub epics: Vec<EpicSpec>,
    /// `(finding_id, reason)` pairs the synthesis dismissed outright.
    #[serde(default)]
    pub dismissed_findings: Vec<DismissedFinding>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DismissedFinding {
    pub finding_id: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct SynthesisMutationResult {
    pub epics_created: usize,
    pub epics_updated: usize,
    pub findings_dismissed: usize,
    pub synthesis_version: u32,
}

/// Apply a parsed synthesis result: upsert `epic/` clusters, record
/// synthesized-out skips for dismissed ids, and regroup the queue by epic
/// dependency order. Applying the same result twice yields identical
/// clusters, reported as updates.
pub fn apply_synthesis_to_plan(
    plan: &mut Plan,
    state: &State,
    synthesis: &SynthesisResult,
) -> SynthesisMutationResult {
    let now = utc_now();
    let mut result = SynthesisMutationResult::default();
    let version = plan.epic_synthesis_meta.version + 1;
    result.synthesis_version = version;

    let valid_ids: BTreeSet<&String> = state
        .findings
        .iter()
        .filter(|(_, f)| f.status == Status::Open && is_review_detector(&f.detector))
        .map(|(fid, _)| fid)
        .collect();

    let mut ordered_epics: Vec<&EpicSpec> = synthesis.epics.iter().collect();
    ordered_epics.sort_by_key(|e| (e.dependency_order, e.name.as_str()));

    for epic in &ordered_epics {
        let epic_name = if epic.name.starts_with(EPIC_PREFIX) {
            epic.name.clone()
        } else {
            format!("{EPIC_PREFIX}{}", epic.name)
        };
        let direction = if VALID_EPIC_DIRECTIONS.contains(&epic.direction.as_str()) {
            epic.direction.clone()
        } else {
            "simplify".to_string()
        };
        let finding_ids: Vec<String> = epic
            .finding_ids
            .iter()
            .filter(|fid| valid_ids.contains(fid))
            .cloned()
            .collect();
        let dismissed: Vec<String> = epic
            .dismissed
            .iter()
            .filter(|fid| valid_ids.contains(fid))
            .cloned()
            .collect();

        match plan.clusters.get_mut(&epic_name) {
            Some(existing) if !existing.thesis.is_empty() => {
                existing.thesis = epic.thesis.clone();
                existing.description = Some(epic.thesis.clone());
                existing.direction = Some(direction);
                existing.root_cause = epic.root_cause.clone();
                existing.finding_ids = finding_ids;
                existing.dismissed = dismissed;
                existing.agent_safe = epic.agent_safe;
                existing.dependency_order = epic.dependency_order;
                existing.action_steps = epic.action_steps.clone();
                existing.synthesis_version = version;
                existing.updated_at = now.clone();
                // An in-progress epic keeps its status through re-synthesis.
                if existing.status != "in_progress" {
                    existing.status = epic.status.clone();
                }
                result.epics_updated += 1;
            }
            _ => {
                let mut cluster = Cluster::new(&epic_name, &now);
                cluster.description = Some(epic.thesis.clone());
                cluster.finding_ids = finding_ids;
                cluster.auto = true;
                cluster.cluster_key = format!("epic::{epic_name}");
                cluster.action = Some(format!("desloppify plan focus {epic_name}"));
                cluster.thesis = epic.thesis.clone();
                cluster.direction = Some(direction);
                cluster.root_cause = epic.root_cause.clone();
                cluster.dismissed = dismissed;
                cluster.agent_safe = epic.agent_safe;
                cluster.dependency_order = epic.dependency_order;
                cluster.action_steps = epic.action_steps.clone();
                cluster.status = epic.status.clone();
                cluster.synthesis_version = version;
                plan.clusters.insert(epic_name, cluster);
                result.epics_created += 1;
            }
        }
    }

    // Dismissals become synthesized_out skips.
    let mut dismissed_ids: Vec<String> = vec![];
    let mut dismiss = |plan: &mut Plan, fid: &String, reason: String, note: Option<String>| {
        plan.queue_order.retain(|id| id != fid);
        plan.skipped.insert(
            fid.clone(),
            SkipEntry {
                finding_id: fid.clone(),
                kind: SkipKind::SynthesizedOut,
                reason: Some(reason),
                note,
                attestation: None,
                created_at: now.clone(),
                review_after: None,
                skipped_at_scan: state.scan_count,
            },
        );
    };
    for df in &synthesis.dismissed_findings {
        if !valid_ids.contains(&df.finding_id) || dismissed_ids.contains(&df.finding_id) {
            continue;
        }
        dismiss(
            plan,
            &df.finding_id,
            df.reason.clone(),
            Some(format!("Dismissed by epic synthesis v{version}")),
        );
        dismissed_ids.push(df.finding_id.clone());
        result.findings_dismissed += 1;
    }
    for epic in &ordered_epics {
        for fid in &epic.dismissed {
            if !valid_ids.contains(fid) || dismissed_ids.contains(fid) {
                continue;
            }
            dismiss(
                plan,
                fid,
                format!("Dismissed by epic synthesis v{version}"),
                None,
            );
            dismissed_ids.push(fid.clone());
            result.findings_dismissed += 1;
        }
    }

    // Queue regrouping: epic members first by dependency order, then the
    // rest in their previous relative order.
    let mut epic_ordered: Vec<String> = vec![];
    let mut seen: BTreeSet<&String> = BTreeSet::new();
    for epic in &ordered_epics {
        for fid in &epic.finding_ids {
            if valid_ids.contains(fid) && !dismissed_ids.contains(fid) && seen.insert(fid) {
                epic_ordered.push(fid.clone());
            }
        }
    }
    let non_epic: Vec<String> = plan
        .queue_order
        .iter()
        .filter(|fid| !epic_ordered.contains(fid) && fid.as_str() != SYNTHESIS_ID)
        .cloned()
        .collect();
    let had_pending = plan.queue_order.iter().any(|id| id == SYNTHESIS_ID);
    plan.queue_order.clear();
    if had_pending {
        plan.queue_order.push(SYNTHESIS_ID.to_string());
    }
    plan.queue_order.extend(epic_ordered);
    plan.queue_order.extend(non_epic);

    let open_review_ids: Vec<String> = valid_ids.iter().map(|s| (*s).clone()).collect();
    let meta = &mut plan.epic_synthesis_meta;
    meta.synthesized_ids = open_review_ids;
    meta.dismissed_ids = dismissed_ids;
    meta.version = version;
    meta.last_run = Some(now.clone());
    meta.finding_snapshot_hash = review_finding_snapshot_hash(state);
    meta.strategy_summary = synthesis.strategy_summary.clone();
    plan.updated = now;

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Confidence, make_finding};
    use serde_json::{Map, Value};

    fn review_finding(name: &str, dim: &str) -> Finding {
        let mut detail = Map::new();
        detail.insert("dimension".to_string(), Value::String(dim.to_string()));
        make_finding("review", ".", name, 1, Confidence::High, "review issue", detail)
    }

    fn state_with_reviews(names: &[(&str, &str)]) -> State {
        let mut state = State::default();
        for (name, dim) in names {
            let f = review_finding(name, dim);
            state.findings.insert(f.id.clone(), f);
        }
        state
    }

    fn pending_plan() -> Plan {
        let mut plan = Plan::default();
        plan.queue_order.push(SYNTHESIS_ID.to_string());
        plan
    }

    fn long_report() -> String {
        "The findings cluster around error handling and naming drift; several contradict each \
other about whether wrappers should exist at all."
            .to_string()
    }

    fn long_strategy() -> String {
        "Execute in three passes: first collapse the duplicated error-wrapping helpers into one \
module, then rename the surviving seams to match domain language, and finally re-run the review \
to confirm the naming dimension stops regressing. Verify by rescanning after each pass."
            .to_string()
    }

    #[test]
    fn observe_requires_pending_marker() {
        let mut plan = Plan::default();
        let state = state_with_reviews(&[("aaaa1111", "naming")]);
        let err = record_observe(&mut plan, &state, &long_report()).unwrap_err();
        assert_eq!(err.code(), "command.no_match");
    }

    #[test]
    fn observe_gates_on_report_length() {
        let mut plan = pending_plan();
        let state = state_with_reviews(&[
            ("aaaa1111", "naming"),
            ("bbbb2222", "naming"),
            ("cccc3333", "errors"),
            ("dddd4444", "errors"),
        ]);
        let err = record_observe(&mut plan, &state, "too short").unwrap_err();
        assert!(err.to_string().contains("minimum 100"));

        let outcome = record_observe(&mut plan, &state, &long_report()).unwrap();
        assert_eq!(outcome.finding_count, 4);
        assert!(plan.epic_synthesis_meta.synthesis_stages.contains_key("observe"));
    }

    #[test]
    fn small_finding_sets_lower_the_report_bar() {
        let mut plan = pending_plan();
        let state = state_with_reviews(&[("aaaa1111", "naming")]);
        let report = "Two naming findings share one root cause: inconsistent suffixes.";
        assert!(report.len() >= 50 && report.len() < 100);
        assert!(record_observe(&mut plan, &state, report).is_ok());
    }

    #[test]
    fn reflect_requires_observe_first() {
        let mut plan = pending_plan();
        let state = state_with_reviews(&[("aaaa1111", "naming")]);
        let err = record_reflect(&mut plan, &state, &long_report()).unwrap_err();
        assert!(err.to_string().contains("observe stage not complete"));
    }

    #[test]
    fn reflect_rejects_report_ignoring_recurring_dimension() {
        let mut plan = pending_plan();
        let mut state = state_with_reviews(&[("aaaa1111", "naming")]);
        // A previously synthesized finding in the same dimension is now
        // resolved: "naming" recurs.
        let mut resolved = review_finding("eeee5555", "naming");
        resolved.status = Status::Fixed;
        state.findings.insert(resolved.id.clone(), resolved);
        plan.epic_synthesis_meta.synthesized_ids = vec!["review::.::eeee5555".to_string()];

        record_observe(&mut plan, &state, &long_report()).unwrap();
        let report = "Progress holds overall; prior fixes stuck and the remaining debt is \
concentrated in one area of the codebase with no loops.";
        let err = record_reflect(&mut plan, &state, report).unwrap_err();
        assert!(err.to_string().contains("Recurring patterns detected"));

        let report_with_dim = format!("{report} The naming dimension keeps recurring.");
        let outcome = record_reflect(&mut plan, &state, &report_with_dim).unwrap();
        assert_eq!(outcome.recurring_dimensions, vec!["naming"]);
    }

    #[test]
    fn organize_requires_enriched_manual_clusters() {
        let mut plan = pending_plan();
        let state = state_with_reviews(&[("aaaa1111", "naming")]);
        record_observe(&mut plan, &state, &long_report()).unwrap();
        record_reflect(&mut plan, &state, &long_report()).unwrap();

        let err = record_organize(&mut plan, &state, &long_report()).unwrap_err();
        assert!(err.to_string().contains("no clusters with findings"));

        crate::plan::create_cluster(&mut plan, "fix-naming", None, None).unwrap();
        crate::plan::add_to_cluster(
            &mut plan,
            "fix-naming",
            &["review::.::aaaa1111".to_string()],
        )
        .unwrap();
        let err = record_organize(&mut plan, &state, &long_report()).unwrap_err();
        assert!(err.to_string().contains("need enrichment"));

        crate::plan::update_cluster(
            &mut plan,
            "fix-naming",
            Some("Unify naming across modules"),
            None,
            Some(&["rename the config seams".to_string()]),
        )
        .unwrap();
        assert!(record_organize(&mut plan, &state, &long_report()).is_ok());
    }

    #[test]
    fn complete_enforces_stage_order_and_strategy() {
        let mut plan = pending_plan();
        let state = state_with_reviews(&[("aaaa1111", "naming")]);

        let err = complete_synthesis(&mut plan, &state, &long_strategy()).unwrap_err();
        assert!(err.to_string().contains("no stages done yet"));

        record_observe(&mut plan, &state, &long_report()).unwrap();
        let err = complete_synthesis(&mut plan, &state, &long_strategy()).unwrap_err();
        assert!(err.to_string().contains("organize stage not done"));

        record_reflect(&mut plan, &state, &long_report()).unwrap();
        crate::plan::create_cluster(&mut plan, "fix-naming", Some("Unify naming"), None).unwrap();
        crate::plan::add_to_cluster(
            &mut plan,
            "fix-naming",
            &["review::.::aaaa1111".to_string()],
        )
        .unwrap();
        plan.queue_order.push("review::.::aaaa1111".to_string());
        crate::plan::update_cluster(
            &mut plan,
            "fix-naming",
            None,
            None,
            Some(&["step one".to_string()]),
        )
        .unwrap();
        record_organize(&mut plan, &state, &long_report()).unwrap();

        let err = complete_synthesis(&mut plan, &state, "short plan").unwrap_err();
        assert!(err.to_string().contains("minimum 200"));

        let outcome = complete_synthesis(&mut plan, &state, &long_strategy()).unwrap();
        assert_eq!(outcome.organized, 1);
        assert!(!plan.queue_order.contains(&SYNTHESIS_ID.to_string()));
        assert!(plan.epic_synthesis_meta.synthesis_stages.is_empty());
        assert_eq!(
            plan.epic_synthesis_meta.strategy_summary,
            long_strategy().trim()
        );
        assert!(!plan.epic_synthesis_meta.finding_snapshot_hash.is_empty());
    }

    #[test]
    fn strategy_same_requires_prior_summary() {
        let mut plan = pending_plan();
        assert!(validate_strategy(&plan, "same").is_err());
        plan.epic_synthesis_meta.strategy_summary = "prior".to_string();
        assert!(validate_strategy(&plan, "SAME").is_ok());
    }

    #[test]
    fn confirm_existing_requires_citing_new_findings() {
        let mut plan = pending_plan();
        let state = state_with_reviews(&[("aaaa1111", "naming"), ("ffff9999", "errors")]);
        plan.epic_synthesis_meta.strategy_summary = "prior strategy".to_string();
        plan.epic_synthesis_meta.synthesized_ids = vec!["review::.::aaaa1111".to_string()];
        record_observe(&mut plan, &state, &long_report()).unwrap();
        record_reflect(&mut plan, &state, &long_report()).unwrap();
        crate::plan::create_cluster(&mut plan, "fix-naming", Some("d"), None).unwrap();
        crate::plan::add_to_cluster(
            &mut plan,
            "fix-naming",
            &["review::.::aaaa1111".to_string()],
        )
        .unwrap();
        crate::plan::update_cluster(&mut plan, "fix-naming", None, None, Some(&["s".to_string()]))
            .unwrap();

        let note_without_citation = "The existing plan still holds because the new finding \
changes nothing structural about the agreed decomposition order we committed to last round.";
        let err = confirm_existing_synthesis(
            &mut plan,
            &state,
            note_without_citation,
            "same",
        )
        .unwrap_err();
        assert!(err.to_string().contains("cite at least 1"));

        let note = format!("{note_without_citation} New finding ffff9999 is cosmetic.");
        let outcome = confirm_existing_synthesis(&mut plan, &state, &note, "same").unwrap();
        assert_eq!(outcome.strategy_summary, "prior strategy");
        assert!(!plan.queue_order.contains(&SYNTHESIS_ID.to_string()));
    }

    #[test]
    fn apply_synthesis_twice_is_idempotent_with_updates() {
        let state = state_with_reviews(&[("aaaa1111", "naming"), ("bbbb2222", "errors")]);
        let mut plan = pending_plan();
        plan.queue_order.push("review::.::aaaa1111".to_string());
        plan.queue_order.push("review::.::bbbb2222".to_string());

        let synthesis: SynthesisResult = serde_json::from_value(serde_json::json!({
            "strategy_summary": "collapse error wrappers first",
            "epics": [{
                "name": "collapse-wrappers",
                "thesis": "Collapse duplicated error wrappers",
                "direction": "merge",
                "finding_ids": ["review::.::bbbb2222"],
                "dependency_order": 1,
                "action_steps": ["merge the helpers"]
            }],
            "dismissed_findings": [
                {"finding_id": "review::.::aaaa1111", "reason": "contradicts epic"}
            ]
        }))
        .unwrap();

        let first = apply_synthesis_to_plan(&mut plan, &state, &synthesis);
        assert_eq!(first.epics_created, 1);
        assert_eq!(first.findings_dismissed, 1);
        assert_eq!(
            plan.skipped["review::.::aaaa1111"].kind,
            SkipKind::SynthesizedOut
        );
        assert_eq!(
            plan.queue_order,
            vec![SYNTHESIS_ID.to_string(), "review::.::bbbb2222".to_string()]
        );

        let clusters_before = serde_json::to_value(&plan.clusters).unwrap();
        let second = apply_synthesis_to_plan(&mut plan, &state, &synthesis);
        assert_eq!(second.epics_created, 0);
        assert_eq!(second.epics_updated, 1);
        let mut clusters_after = serde_json::to_value(&plan.clusters).unwrap();
        // Timestamps and version advance; everything else must be identical.
        for cluster in [&clusters_before, &clusters_after] {
            assert!(cluster.get("epic/collapse-wrappers").is_some());
        }
        if let Some(obj) = clusters_after
            .get_mut("epic/collapse-wrappers")
            .and_then(Value::as_object_mut)
        {
            let before = clusters_before.get("epic/collapse-wrappers").unwrap();
            obj.insert("updated_at".into(), before["updated_at"].clone());
            obj.insert(
                "synthesis_version".into(),
                before["synthesis_version"].clone(),
            );
        }
        assert_eq!(clusters_before, clusters_after);
    }

    #[test]
    fn citation_extraction_matches_ids_and_suffixes() {
        let valid: BTreeSet<String> = ["review::.::aaaa1111bbbb", "review::src/x.py::cafe0123"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let cited = extract_finding_citations(
            "See review::.::aaaa1111bbbb and the cafe0123 one.",
            &valid,
        );
        assert_eq!(cited.len(), 2);
        let none = extract_finding_citations("nothing relevant here", &valid);
        assert!(none.is_empty());
    }
}
