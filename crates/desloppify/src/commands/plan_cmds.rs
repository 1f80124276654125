//! `plan` subcommands: queue view, reordering, skips, annotations, clusters,
//! and focus.

use crate::commands::resolve::apply_skip;
use crate::commands::{require_completed_scan, resolve_ids_from_patterns};
use crate::errors::CommandError;
use crate::plan::{self, MovePosition, SkipKind};
use crate::query::QueryPayload;
use crate::runtime::Runtime;
use crate::scoring::{refresh_dimension_scores, score_snapshot};
use crate::state::{Status, StatusFilter, resolve_findings};
use crate::work_queue::{QueueOptions, build_work_queue};

pub fn cmd_plan_queue(
    rt: &Runtime,
    count: Option<usize>,
    include_skipped: bool,
    cluster: Option<String>,
) -> Result<QueryPayload, CommandError> {
    let (state, plan) = rt.load_stores();
    require_completed_scan(&state)?;

    let effective_cluster = cluster.or_else(|| plan.active_cluster.clone());
    let options = QueueOptions {
        count,
        include_skipped,
        cluster: effective_cluster.clone(),
        collapse_clusters: true,
        subjective_threshold: rt.config.target_strict_score as f64,
        ..QueueOptions::default()
    };
    let queue = build_work_queue(&state, Some(&plan), &options)?;

    Ok(QueryPayload::new("plan_queue")
        .set("queue", &queue)
        .set("active_cluster", &plan.active_cluster)
        .set("skipped_count", plan.skipped.len())
        .set("superseded_count", plan.superseded.len())
        .set("plan_start_scores", &plan.plan_start_scores)
        .with_scores(score_snapshot(&state)))
}

pub fn cmd_plan_move(
    rt: &Runtime,
    patterns: Vec<String>,
    position: &str,
    target: Option<String>,
    offset: Option<usize>,
) -> Result<QueryPayload, CommandError> {
    let (state, mut plan) = rt.load_stores();
    require_completed_scan(&state)?;

    let position = MovePosition::parse(position).ok_or_else(|| {
        CommandError::validation(format!(
            "Unknown position: {position} (expected top, bottom, before, after, up, or down)"
        ))
    })?;
    let ids = resolve_ids_from_patterns(&state, &plan, &patterns, StatusFilter::All);
    if ids.is_empty() {
        return Err(CommandError::referential(format!(
            "No matching findings found: {}",
            patterns.join(" ")
        )));
    }

    let moved = plan::move_items(&mut plan, &ids, position, target.as_deref(), offset);
    rt.commit(None, Some(&mut plan))?;

    Ok(QueryPayload::new("plan_move")
        .set("moved", &ids)
        .set("count", moved)
        .set("queue_order", &plan.queue_order))
}

#[derive(Debug, Clone, Default)]
pub struct PlanSkipArgs {
    pub patterns: Vec<String>,
    pub permanent: bool,
    pub false_positive: bool,
    pub reason: Option<String>,
    pub note: Option<String>,
    pub attest: Option<String>,
    pub review_after: Option<u32>,
}

pub fn cmd_plan_skip(rt: &Runtime, args: &PlanSkipArgs) -> Result<QueryPayload, CommandError> {
    let (mut state, mut plan) = rt.load_stores();
    require_completed_scan(&state)?;

    let kind = if args.false_positive {
        SkipKind::FalsePositive
    } else if args.permanent {
        SkipKind::Permanent
    } else {
        SkipKind::Temporary
    };

    let ids = resolve_ids_from_patterns(&state, &plan, &args.patterns, StatusFilter::All);
    if ids.is_empty() {
        return Err(CommandError::referential(format!(
            "No matching findings found: {}",
            args.patterns.join(" ")
        )));
    }

    let count = apply_skip(
        rt,
        &mut state,
        &mut plan,
        &ids,
        kind,
        args.reason.as_deref(),
        args.note.as_deref(),
        args.attest.as_deref(),
        args.review_after,
    )?;

    Ok(QueryPayload::new("plan_skip")
        .set("skipped", &ids)
        .set("count", count)
        .set("kind", kind.token())
        .set("review_after", args.review_after)
        .with_scores(score_snapshot(&state)))
}

pub fn cmd_plan_unskip(rt: &Runtime, patterns: Vec<String>) -> Result<QueryPayload, CommandError> {
    let (mut state, mut plan) = rt.load_stores();
    require_completed_scan(&state)?;

    // Skipped items may be wontfix or false_positive in state, so match all.
    let ids = resolve_ids_from_patterns(&state, &plan, &patterns, StatusFilter::All);
    if ids.is_empty() {
        return Err(CommandError::referential(format!(
            "No matching findings found: {}",
            patterns.join(" ")
        )));
    }

    let (count, need_reopen) = plan::unskip_items(&mut plan, &ids);
    let mut reopened = vec![];
    for fid in &need_reopen {
        reopened.extend(resolve_findings(&mut state, fid, Status::Open, None, None));
    }
    refresh_dimension_scores(&mut state);
    let scores = score_snapshot(&state);
    plan::refresh_plan_cycle(&mut plan, scores);
    rt.commit(Some(&mut state), Some(&mut plan))?;

    Ok(QueryPayload::new("plan_unskip")
        .set("unskipped", count)
        .set("reopened", &reopened)
        .with_scores(scores))
}

pub fn cmd_plan_reopen(rt: &Runtime, patterns: Vec<String>) -> Result<QueryPayload, CommandError> {
    let (mut state, mut plan) = rt.load_stores();
    require_completed_scan(&state)?;

    let mut reopened = vec![];
    for pattern in &patterns {
        reopened.extend(resolve_findings(&mut state, pattern, Status::Open, None, None));
    }
    if reopened.is_empty() {
        return Err(CommandError::referential(format!(
            "No resolved findings matching: {}",
            patterns.join(" ")
        )));
    }

    for fid in &reopened {
        plan.skipped.remove(fid);
        if !plan.queue_order.contains(fid) {
            plan.queue_order.push(fid.clone());
        }
    }
    refresh_dimension_scores(&mut state);
    let scores = score_snapshot(&state);
    plan::refresh_plan_cycle(&mut plan, scores);
    rt.commit(Some(&mut state), Some(&mut plan))?;

    Ok(QueryPayload::new("plan_reopen")
        .set("reopened", &reopened)
        .with_scores(scores))
}

pub fn cmd_plan_describe(
    rt: &Runtime,
    patterns: Vec<String>,
    text: Option<String>,
) -> Result<QueryPayload, CommandError> {
    let (state, mut plan) = rt.load_stores();
    require_completed_scan(&state)?;

    let ids = resolve_ids_from_patterns(&state, &plan, &patterns, StatusFilter::All);
    if ids.is_empty() {
        return Err(CommandError::referential(format!(
            "No matching findings found: {}",
            patterns.join(" ")
        )));
    }
    for fid in &ids {
        plan::describe_finding(&mut plan, fid, text.as_deref());
    }
    rt.commit(None, Some(&mut plan))?;
    Ok(QueryPayload::new("plan_describe")
        .set("described", &ids)
        .set("description", &text))
}

pub fn cmd_plan_note(
    rt: &Runtime,
    patterns: Vec<String>,
    text: Option<String>,
) -> Result<QueryPayload, CommandError> {
    let (state, mut plan) = rt.load_stores();
    require_completed_scan(&state)?;

    let ids = resolve_ids_from_patterns(&state, &plan, &patterns, StatusFilter::All);
    if ids.is_empty() {
        return Err(CommandError::referential(format!(
            "No matching findings found: {}",
            patterns.join(" ")
        )));
    }
    for fid in &ids {
        plan::annotate_finding(&mut plan, fid, text.as_deref());
    }
    rt.commit(None, Some(&mut plan))?;
    Ok(QueryPayload::new("plan_note")
        .set("annotated", &ids)
        .set("note", &text))
}

pub fn cmd_plan_focus(
    rt: &Runtime,
    cluster_name: Option<String>,
    clear: bool,
) -> Result<QueryPayload, CommandError> {
    let (state, mut plan) = rt.load_stores();
    require_completed_scan(&state)?;

    if clear {
        plan::clear_focus(&mut plan);
        rt.commit(None, Some(&mut plan))?;
        return Ok(QueryPayload::new("plan_focus").set("active_cluster", serde_json::Value::Null));
    }
    match cluster_name {
        Some(name) => {
            plan::set_focus(&mut plan, &name)?;
            rt.commit(None, Some(&mut plan))?;
            Ok(QueryPayload::new("plan_focus").set("active_cluster", name))
        }
        None => Ok(QueryPayload::new("plan_focus").set("active_cluster", &plan.active_cluster)),
    }
}

#[derive(Debug, Clone)]
pub enum ClusterAction {
    Create {
        name: String,
        description: Option<String>,
        action: Option<String>,
    },
    Delete {
        name: String,
    },
    Add {
        name: String,
        patterns: Vec<String>,
    },
    Remove {
        name: String,
        patterns: Vec<String>,
    },
    Move {
        name: String,
        position: String,
        target: Option<String>,
        offset: Option<usize>,
    },
    Update {
        name: String,
        description: Option<String>,
        action: Option<String>,
        steps: Option<Vec<String>>,
    },
    Show {
        name: String,
    },
}

pub fn cmd_plan_cluster(rt: &Runtime, action: ClusterAction) -> Result<QueryPayload, CommandError> {
    let (state, mut plan) = rt.load_stores();
    require_completed_scan(&state)?;

    let payload = match action {
        ClusterAction::Create {
            name,
            description,
            action,
        } => {
            plan::create_cluster(&mut plan, &name, description.as_deref(), action.as_deref())?;
            rt.commit(None, Some(&mut plan))?;
            QueryPayload::new("plan_cluster_create").set("cluster", name)
        }
        ClusterAction::Delete { name } => {
            let orphaned = plan::delete_cluster(&mut plan, &name)?;
            rt.commit(None, Some(&mut plan))?;
            QueryPayload::new("plan_cluster_delete")
                .set("cluster", name)
                .set("orphaned", orphaned)
        }
        ClusterAction::Add { name, patterns } => {
            let ids = resolve_ids_from_patterns(&state, &plan, &patterns, StatusFilter::All);
            if ids.is_empty() {
                return Err(CommandError::referential(format!(
                    "No matching findings found: {}",
                    patterns.join(" ")
                )));
            }
            let added = plan::add_to_cluster(&mut plan, &name, &ids)?;
            rt.commit(None, Some(&mut plan))?;
            QueryPayload::new("plan_cluster_add")
                .set("cluster", name)
                .set("added", added)
                .set("members", ids)
        }
        ClusterAction::Remove { name, patterns } => {
            let ids = resolve_ids_from_patterns(&state, &plan, &patterns, StatusFilter::All);
            let removed = plan::remove_from_cluster(&mut plan, &name, &ids)?;
            rt.commit(None, Some(&mut plan))?;
            QueryPayload::new("plan_cluster_remove")
                .set("cluster", name)
                .set("removed", removed)
        }
        ClusterAction::Move {
            name,
            position,
            target,
            offset,
        } => {
            let position = MovePosition::parse(&position).ok_or_else(|| {
                CommandError::validation(format!("Unknown position: {position}"))
            })?;
            let moved = plan::move_cluster(&mut plan, &name, position, target.as_deref(), offset)?;
            rt.commit(None, Some(&mut plan))?;
            QueryPayload::new("plan_cluster_move")
                .set("cluster", name)
                .set("moved", moved)
        }
        ClusterAction::Update {
            name,
            description,
            action,
            steps,
        } => {
            plan::update_cluster(
                &mut plan,
                &name,
                description.as_deref(),
                action.as_deref(),
                steps.as_deref(),
            )?;
            rt.commit(None, Some(&mut plan))?;
            QueryPayload::new("plan_cluster_update").set("cluster", name)
        }
        ClusterAction::Show { name } => {
            let Some(cluster) = plan.clusters.get(&name) else {
                return Err(CommandError::referential(format!(
                    "Cluster {name:?} does not exist"
                )));
            };
            QueryPayload::new("plan_cluster_show").set("cluster", cluster)
        }
    };
    Ok(payload)
}

pub fn cmd_plan_status(rt: &Runtime) -> Result<QueryPayload, CommandError> {
    let (state, plan) = rt.load_stores();
    require_completed_scan(&state)?;

    let auto_clusters = plan.clusters.values().filter(|c| c.auto).count();
    let epics = plan.epics().count();
    Ok(QueryPayload::new("plan_status")
        .set("queue_length", plan.queue_order.len())
        .set("skipped_count", plan.skipped.len())
        .set("superseded_count", plan.superseded.len())
        .set("clusters", plan.clusters.len())
        .set("auto_clusters", auto_clusters)
        .set("epics", epics)
        .set("active_cluster", &plan.active_cluster)
        .set("plan_start_scores", &plan.plan_start_scores)
        .set("strategy_summary", &plan.epic_synthesis_meta.strategy_summary)
        .with_scores(score_snapshot(&state)))
}
