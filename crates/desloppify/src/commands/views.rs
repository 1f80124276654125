//! Scan, next, status, and config command surfaces.

use crate::commands::require_completed_scan;
use crate::config::{CONFIG_KEYS, save_config};
use crate::detectors;
use crate::errors::CommandError;
use crate::git::project_name;
use crate::query::QueryPayload;
use crate::runtime::Runtime;
use crate::scoring::score_snapshot;
use crate::state::{State, StatusFilter, apply_finding_noise_budget};
use crate::work_queue::{QueueOptions, build_work_queue};

pub fn cmd_scan(rt: &mut Runtime, path: Option<&str>) -> Result<QueryPayload, CommandError> {
    let (mut state, mut plan) = rt.load_stores();
    let summary = crate::scan::run_scan(rt, &mut state, &mut plan, path)?;

    for warning in &summary.warnings {
        eprintln!("Warning: {warning}.");
    }

    // A completed scan satisfies any pending needs_rescan flag.
    if rt.config.needs_rescan {
        rt.config.needs_rescan = false;
        save_config(&rt.config, &rt.config_path())?;
    }

    Ok(QueryPayload::new("scan")
        .set("lang", &rt.lang)
        .set("path", path)
        .set("files_scanned", summary.files_scanned)
        .set("new_findings", &summary.new_findings)
        .set("reopened", &summary.reopened)
        .set("auto_resolved", &summary.auto_resolved)
        .set("superseded", &summary.superseded)
        .set("resurfaced", &summary.resurfaced)
        .set("pruned", &summary.pruned)
        .set("clusters_changed", summary.clusters_changed)
        .set("suppressed", summary.suppressed)
        .set("open", state.stats.open)
        .set("scan_count", state.scan_count)
        .set("warnings", &summary.warnings)
        .with_scores(summary.scores)
        .with_prev_scores(summary.prev_scores))
}

#[derive(Debug, Clone, Default)]
pub struct NextArgs {
    pub tier: Option<u8>,
    pub count: Option<usize>,
    pub scope: Option<String>,
    pub status: Option<String>,
    pub chronic: bool,
    pub no_tier_fallback: bool,
    pub explain: bool,
    pub cluster: Option<String>,
    pub include_skipped: bool,
}

pub fn cmd_next(rt: &Runtime, args: &NextArgs) -> Result<QueryPayload, CommandError> {
    let (state, plan) = rt.load_stores();
    require_completed_scan(&state)?;

    let status = match args.status.as_deref() {
        None => StatusFilter::Only(crate::state::Status::Open),
        Some(token) => StatusFilter::parse(token).ok_or_else(|| {
            CommandError::validation(format!("Unsupported status filter: {token}"))
        })?,
    };

    let plan_ref = plan.is_living().then_some(&plan);
    // Auto-scope to the focused cluster unless the caller narrowed the view.
    let effective_cluster = args.cluster.clone().or_else(|| {
        if args.scope.is_none() {
            plan_ref.and_then(|p| p.active_cluster.clone())
        } else {
            None
        }
    });

    let options = QueueOptions {
        tier: args.tier,
        count: Some(args.count.unwrap_or(1).max(1)),
        scope: args.scope.clone(),
        status,
        include_subjective: true,
        subjective_threshold: rt.config.target_strict_score as f64,
        chronic: args.chronic,
        no_tier_fallback: args.no_tier_fallback,
        explain: args.explain,
        include_skipped: args.include_skipped,
        cluster: effective_cluster,
        collapse_clusters: false,
    };
    let queue = build_work_queue(&state, plan_ref, &options)?;

    Ok(QueryPayload::new("next")
        .set("queue", &queue)
        .set("items", &queue.items)
        .set("plan_active", plan.is_living())
        .set("plan_start_scores", &plan.plan_start_scores)
        .with_scores(score_snapshot(&state)))
}

fn integrity_warnings(rt: &Runtime, state: &State) -> Vec<String> {
    let mut warnings = vec![];
    if let Some(stored) = &state.tool_hash
        && *stored != detectors::tool_hash()
    {
        warnings.push("Detector tooling changed since last scan; re-scan to refresh scores.".to_string());
    }
    if rt.config.needs_rescan {
        warnings.push("Config changed since last scan; cached scores may be stale.".to_string());
    }
    let suppressed = state.findings.values().filter(|f| f.suppressed).count();
    if suppressed > 0 {
        warnings.push(format!(
            "{suppressed} finding(s) are suppressed by ignore patterns and still count against \
the strict score."
        ));
    }
    warnings
}

pub fn cmd_status(rt: &Runtime) -> Result<QueryPayload, CommandError> {
    let (state, plan) = rt.load_stores();
    require_completed_scan(&state)?;

    // Surface the noisiest open findings under the configured budgets.
    let open: Vec<_> = state
        .findings
        .values()
        .filter(|f| f.status == crate::state::Status::Open && !f.suppressed)
        .collect();
    let (surfaced, hidden) = apply_finding_noise_budget(
        open,
        rt.config.finding_noise_budget.max(0) as usize,
        rt.config.finding_noise_global_budget.max(0) as usize,
    );
    let surfaced_ids: Vec<&str> = surfaced.iter().map(|f| f.id.as_str()).collect();

    Ok(QueryPayload::new("status")
        .set("project", project_name(&rt.root))
        .set("lang", &rt.lang)
        .set("stats", &state.stats)
        .set("scan_count", state.scan_count)
        .set("last_scan", &state.last_scan)
        .set("dimension_scores", &state.dimension_scores)
        .set("queue_length", plan.queue_order.len())
        .set("plan_start_scores", &plan.plan_start_scores)
        .set("surfaced", surfaced_ids)
        .set("hidden_by_detector", hidden)
        .set("integrity_warnings", integrity_warnings(rt, &state))
        .with_scores(score_snapshot(&state)))
}

pub fn cmd_config_list(rt: &Runtime) -> Result<QueryPayload, CommandError> {
    Ok(QueryPayload::new("config_list")
        .set("keys", CONFIG_KEYS)
        .set("config", rt.config.for_query()))
}

pub fn cmd_config_get(rt: &Runtime, key: &str) -> Result<QueryPayload, CommandError> {
    let value = rt.config.get_value(key)?;
    Ok(QueryPayload::new("config_get")
        .set("key", key)
        .set("value", value))
}

pub fn cmd_config_set(rt: &mut Runtime, key: &str, value: &str) -> Result<QueryPayload, CommandError> {
    rt.config.set_value(key, value)?;
    // Scan-affecting keys invalidate cached scores until the next scan.
    if matches!(
        key,
        "exclude" | "ignore" | "large_files_threshold" | "props_threshold"
    ) {
        rt.config.needs_rescan = true;
    }
    save_config(&rt.config, &rt.config_path())?;
    Ok(QueryPayload::new("config_set")
        .set("key", key)
        .set("value", rt.config.get_value(key)?)
        .set("needs_rescan", rt.config.needs_rescan))
}

pub fn cmd_config_unset(rt: &mut Runtime, key: &str) -> Result<QueryPayload, CommandError> {
    rt.config.unset_value(key)?;
    save_config(&rt.config, &rt.config_path())?;
    Ok(QueryPayload::new("config_unset").set("key", key))
}
