//! Unified work-queue selection for the next/plan/show surfaces: ranking,
//! tier fallback, synthetic subjective items, and cluster collapsing.

use crate::errors::CommandError;
use crate::plan::{Plan, SYNTHESIS_ID};
use crate::state::{Confidence, State, Status, StatusFilter, path_scoped_findings};
use schemars::JsonSchema;
use serde::Serialize;
use serde_json::Map;
use std::collections::BTreeMap;

mod helpers;

pub use helpers::{build_subjective_items, primary_command_for_finding, scope_matches};

#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub tier: Option<u8>,
    pub count: Option<usize>,
    pub scope: Option<String>,
    pub status: StatusFilter,
    pub include_subjective: bool,
    /// Subjective dimensions below this strict score surface as synthetic
    /// items. Defaults to the configured target strict score.
    pub subjective_threshold: f64,
    pub chronic: bool,
    pub no_tier_fallback: bool,
    pub explain: bool,
    pub include_skipped: bool,
    pub cluster: Option<String>,
    pub collapse_clusters: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            tier: None,
            count: Some(1),
            scope: None,
            status: StatusFilter::Only(Status::Open),
            include_subjective: true,
            subjective_threshold: 95.0,
            chronic: false,
            no_tier_fallback: false,
            explain: false,
            include_skipped: false,
            cluster: None,
            collapse_clusters: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ExplainInfo {
    pub kind: String,
    pub effective_tier: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_rank: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subjective_score: Option<f64>,
    pub count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    pub ranking_factors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct QueueItem {
    pub id: String,
    /// `finding`, `subjective_dimension`, `synthesis`, or `cluster`.
    pub kind: String,
    pub detector: String,
    pub file: String,
    pub tier: u8,
    pub effective_tier: u8,
    pub confidence: Confidence,
    pub status: Status,
    pub summary: String,
    pub detail: Map<String, serde_json::Value>,
    pub is_review: bool,
    pub is_subjective: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subjective_score: Option<f64>,
    pub reopen_count: u32,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier_range: Option<(u8, u8)>,
    pub primary_command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<ExplainInfo>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct WorkQueue {
    pub items: Vec<QueueItem>,
    pub total: usize,
    pub tier_counts: BTreeMap<u8, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_tier: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_tier: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub available_tiers: Vec<u8>,
}

pub fn review_finding_weight(confidence: Confidence, holistic: bool) -> f64 {
    let weight = confidence.weight();
    if holistic { weight * 10.0 } else { weight }
}

fn detail_count(detail: &Map<String, serde_json::Value>) -> i64 {
    detail.get("count").and_then(|v| v.as_i64()).unwrap_or(0)
}

/// Totally ordered ranking key. Review findings outrank everything, by
/// weight; subjective items sink to the back of their tier; mechanical items
/// rank by confidence, then hit count, then id.
fn sort_key(item: &QueueItem) -> (u8, u8, i64, i64, String) {
    if item.kind == "synthesis" {
        return (0, 0, i64::MIN, 0, item.id.clone());
    }
    if item.is_review {
        let weight = item.review_weight.unwrap_or(0.0);
        return (
            0,
            0,
            -((weight * 1000.0) as i64),
            item.confidence.rank() as i64,
            item.id.clone(),
        );
    }
    if item.kind == "subjective_dimension" || item.is_subjective {
        let score = item.subjective_score.unwrap_or(100.0);
        return (
            item.effective_tier,
            1,
            (score * 1000.0) as i64,
            0,
            item.id.clone(),
        );
    }
    (
        item.effective_tier,
        0,
        item.confidence.rank() as i64,
        -detail_count(&item.detail),
        item.id.clone(),
    )
}

fn explain_for(item: &QueueItem) -> ExplainInfo {
    if item.is_review {
        return ExplainInfo {
            kind: item.kind.clone(),
            effective_tier: item.effective_tier,
            confidence: Some(item.confidence),
            confidence_rank: Some(item.confidence.rank()),
            review_weight: item.review_weight,
            subjective_score: None,
            count: 0,
            policy: Some(
                "Open review findings are always ranked first and shown before mechanical or \
synthetic subjective queue items."
                    .to_string(),
            ),
            ranking_factors: vec![
                "review_priority".into(),
                "review_weight desc".into(),
                "confidence asc".into(),
                "id asc".into(),
            ],
        };
    }
    if item.kind == "subjective_dimension" || item.is_subjective {
        return ExplainInfo {
            kind: item.kind.clone(),
            effective_tier: item.effective_tier,
            confidence: None,
            confidence_rank: None,
            review_weight: None,
            subjective_score: item.subjective_score,
            count: 0,
            policy: Some(
                "Subjective dimensions are always queued as T4 and do not outrank mechanical \
T1/T2/T3 items."
                    .to_string(),
            ),
            ranking_factors: vec![
                "tier asc".into(),
                "subjective_score asc".into(),
                "id asc".into(),
            ],
        };
    }
    ExplainInfo {
        kind: item.kind.clone(),
        effective_tier: item.effective_tier,
        confidence: Some(item.confidence),
        confidence_rank: Some(item.confidence.rank()),
        review_weight: None,
        subjective_score: None,
        count: detail_count(&item.detail),
        policy: None,
        ranking_factors: vec![
            "tier asc".into(),
            "confidence asc".into(),
            "count desc".into(),
            "id asc".into(),
        ],
    }
}

fn tier_counts(items: &[QueueItem]) -> BTreeMap<u8, usize> {
    let mut counts: BTreeMap<u8, usize> = (1..=4).map(|t| (t, 0)).collect();
    for item in items {
        *counts.entry(item.effective_tier.clamp(1, 4)).or_insert(0) += 1;
    }
    counts
}

fn choose_fallback_tier(requested: u8, counts: &BTreeMap<u8, usize>) -> Option<u8> {
    counts
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(tier, _)| *tier)
        .min_by_key(|tier| (tier.abs_diff(requested), *tier))
}

fn build_finding_items(
    state: &State,
    plan: Option<&Plan>,
    options: &QueueOptions,
) -> Vec<QueueItem> {
    let scoped = path_scoped_findings(&state.findings, state.scan_path.as_deref());
    let mut items = vec![];

    for (fid, finding) in scoped {
        if finding.suppressed {
            continue;
        }
        if !options.status.matches(finding.status) {
            continue;
        }
        if options.chronic && !finding.is_chronic() {
            continue;
        }
        let skipped_entry = plan.is_some_and(|p| p.skipped.contains_key(fid));
        if skipped_entry && !options.include_skipped {
            continue;
        }

        let is_review = finding.detector == "review";
        let is_subjective =
            finding.detector == "subjective_assessment" || finding.detector == "holistic_review";
        let effective_tier = if is_review {
            1
        } else if is_subjective {
            4
        } else {
            finding.tier.clamp(1, 4)
        };
        let review_weight = is_review
            .then(|| review_finding_weight(finding.confidence, finding.is_holistic()));

        let item = QueueItem {
            id: fid.to_string(),
            kind: "finding".to_string(),
            detector: finding.detector.clone(),
            file: finding.file.clone(),
            tier: finding.tier,
            effective_tier,
            confidence: finding.confidence,
            status: finding.status,
            summary: finding.summary.clone(),
            detail: finding.detail.clone(),
            is_review,
            is_subjective,
            review_weight,
            subjective_score: None,
            reopen_count: finding.reopen_count,
            skipped: skipped_entry,
            cluster: plan.and_then(|p| {
                p.overrides
                    .get(fid)
                    .and_then(|o| o.cluster.clone())
            }),
            member_count: None,
            tier_range: None,
            primary_command: primary_command_for_finding(finding),
            explain: None,
        };
        if scope_matches(&item, options.scope.as_deref()) {
            items.push(item);
        }
    }
    items
}

fn synthesis_item(plan: &Plan) -> QueueItem {
    QueueItem {
        id: SYNTHESIS_ID.to_string(),
        kind: "synthesis".to_string(),
        detector: "synthesis".to_string(),
        file: ".".to_string(),
        tier: 1,
        effective_tier: 1,
        confidence: Confidence::High,
        status: Status::Open,
        summary: "Review findings changed: synthesize them into an execution plan".to_string(),
        detail: Map::new(),
        is_review: false,
        is_subjective: false,
        review_weight: None,
        subjective_score: None,
        reopen_count: 0,
        skipped: false,
        cluster: None,
        member_count: None,
        tier_range: None,
        primary_command: "desloppify plan synthesize".to_string(),
        explain: None,
    }
}

/// Replace runs of >=2 consecutive items from the same auto-cluster with one
/// cluster item. Manual clusters never collapse.
fn collapse_cluster_runs(items: Vec<QueueItem>, plan: &Plan) -> Vec<QueueItem> {
    let collapsible = |item: &QueueItem| -> Option<String> {
        let name = item.cluster.as_deref()?;
        let cluster = plan.clusters.get(name)?;
        (cluster.auto && !cluster.is_epic()).then(|| name.to_string())
    };

    let mut out: Vec<QueueItem> = vec![];
    let mut run: Vec<QueueItem> = vec![];
    let mut run_cluster: Option<String> = None;

    let flush = |out: &mut Vec<QueueItem>, run: &mut Vec<QueueItem>, name: &Option<String>| {
        if run.len() >= 2
            && let Some(name) = name
            && let Some(cluster) = plan.clusters.get(name)
        {
            let min_tier = run.iter().map(|i| i.effective_tier).min().unwrap_or(1);
            let max_tier = run.iter().map(|i| i.effective_tier).max().unwrap_or(min_tier);
            let first = &run[0];
            out.push(QueueItem {
                id: name.clone(),
                kind: "cluster".to_string(),
                detector: first.detector.clone(),
                file: String::new(),
                tier: min_tier,
                effective_tier: min_tier,
                confidence: first.confidence,
                status: Status::Open,
                summary: cluster
                    .description
                    .clone()
                    .unwrap_or_else(|| name.clone()),
                detail: Map::new(),
                is_review: false,
                is_subjective: false,
                review_weight: None,
                subjective_score: None,
                reopen_count: 0,
                skipped: false,
                cluster: Some(name.clone()),
                member_count: Some(cluster.finding_ids.len()),
                tier_range: Some((min_tier, max_tier)),
                primary_command: cluster
                    .action
                    .clone()
                    .unwrap_or_else(|| format!("desloppify next --cluster {name}")),
                explain: None,
            });
            run.clear();
        } else {
            out.append(run);
        }
    };

    for item in items {
        let item_cluster = collapsible(&item);
        if item_cluster != run_cluster {
            flush(&mut out, &mut run, &run_cluster);
            run_cluster = item_cluster;
        }
        match run_cluster {
            Some(_) => run.push(item),
            None => out.push(item),
        }
    }
    flush(&mut out, &mut run, &run_cluster);
    out
}

/// Build ranked queue items plus tier metadata. Deterministic for fixed
/// state + plan + options.
pub fn build_work_queue(
    state: &State,
    plan: Option<&Plan>,
    options: &QueueOptions,
) -> Result<WorkQueue, CommandError> {
    let threshold = options.subjective_threshold.clamp(0.0, 100.0);
    let mut items = build_finding_items(state, plan, options);

    let statuses_allow_synthetics = matches!(
        options.status,
        StatusFilter::All | StatusFilter::Only(Status::Open)
    );
    if options.include_subjective && statuses_allow_synthetics && !options.chronic {
        for item in build_subjective_items(state, threshold) {
            if scope_matches(&item, options.scope.as_deref()) {
                items.push(item);
            }
        }
    }
    if let Some(plan) = plan
        && statuses_allow_synthetics
        && !options.chronic
        && options.scope.is_none()
        && plan.queue_order.iter().any(|id| id == SYNTHESIS_ID)
    {
        items.push(synthesis_item(plan));
    }

    items.sort_by_cached_key(sort_key);
    let counts = tier_counts(&items);

    // Focused cluster keeps only members, expanded.
    if let Some(cluster_name) = &options.cluster {
        let Some(plan) = plan else {
            return Err(CommandError::referential(format!(
                "Cluster {cluster_name:?} does not exist"
            )));
        };
        let Some(cluster) = plan.clusters.get(cluster_name) else {
            return Err(CommandError::referential(format!(
                "Cluster {cluster_name:?} does not exist"
            )));
        };
        items.retain(|item| cluster.finding_ids.contains(&item.id));
    }

    let requested_tier = options.tier;
    let mut selected_tier = requested_tier;
    let mut fallback_reason = None;
    if let Some(requested) = requested_tier {
        let mut filtered: Vec<QueueItem> = items
            .iter()
            .filter(|i| i.effective_tier == requested)
            .cloned()
            .collect();
        if filtered.is_empty() && !options.no_tier_fallback {
            if let Some(chosen) = choose_fallback_tier(requested, &counts) {
                selected_tier = Some(chosen);
                filtered = items
                    .iter()
                    .filter(|i| i.effective_tier == chosen)
                    .cloned()
                    .collect();
                fallback_reason = Some(format!(
                    "Requested T{requested} has 0 open -> showing T{chosen} (nearest non-empty)."
                ));
            }
        } else if filtered.is_empty() {
            fallback_reason = Some(format!("Requested T{requested} has 0 open."));
        }
        items = filtered;
    }

    if options.collapse_clusters
        && options.cluster.is_none()
        && let Some(plan) = plan
        && plan.is_living()
    {
        items = collapse_cluster_runs(items, plan);
    }

    let total = items.len();
    if let Some(count) = options.count
        && count > 0
    {
        items.truncate(count);
    }
    if options.explain {
        for item in &mut items {
            item.explain = Some(explain_for(item));
        }
    }

    let available_tiers = counts
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(tier, _)| *tier)
        .collect();

    Ok(WorkQueue {
        items,
        total,
        tier_counts: counts,
        requested_tier,
        selected_tier,
        fallback_reason,
        available_tiers,
    })
}
