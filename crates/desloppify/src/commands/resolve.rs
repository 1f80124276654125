//! Resolve and ignore flows, including the anti-gaming guardrails: wontfix
//! notes, attestation phrases, and the batch-wontfix confirmation.

use crate::attest::{attestation_requirement, validate_attestation};
use crate::commands::{require_completed_scan, resolve_ids_from_patterns};
use crate::errors::CommandError;
use crate::plan::{self, Plan};
use crate::query::QueryPayload;
use crate::runtime::Runtime;
use crate::scoring::{refresh_dimension_scores, round1, score_snapshot};
use crate::state::{
    AttestationEntry, State, Status, StatusFilter, resolve_findings, sync_suppressions, utc_now,
};

const BATCH_WONTFIX_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct ResolveArgs {
    pub patterns: Vec<String>,
    pub status: String,
    pub note: Option<String>,
    pub attest: Option<String>,
    pub confirm_batch_wontfix: bool,
}

fn parse_target_status(token: &str) -> Result<Status, CommandError> {
    Status::parse(token).ok_or_else(|| {
        CommandError::validation(format!(
            "Unknown status: {token} (expected open, fixed, wontfix, or false_positive)"
        ))
    })
}

fn preview_open_matches(state: &State, plan: &Plan, patterns: &[String]) -> usize {
    resolve_ids_from_patterns(state, plan, patterns, StatusFilter::Only(Status::Open))
        .into_iter()
        .filter(|id| !Plan::is_synthetic_id(id))
        .count()
}

fn apply_all_patterns(
    state: &mut State,
    plan: &Plan,
    args: &ResolveArgs,
    target: Status,
) -> Vec<String> {
    let mut affected = vec![];
    for pattern in &args.patterns {
        // Cluster names expand to member ids before resolution.
        if let Some(cluster) = plan.clusters.get(pattern) {
            for fid in cluster.finding_ids.clone() {
                affected.extend(resolve_findings(
                    state,
                    &fid,
                    target,
                    args.note.as_deref(),
                    args.attest.as_deref(),
                ));
            }
            continue;
        }
        affected.extend(resolve_findings(
            state,
            pattern,
            target,
            args.note.as_deref(),
            args.attest.as_deref(),
        ));
    }
    affected.dedup();
    affected
}

fn enforce_batch_wontfix(
    state: &State,
    plan: &Plan,
    args: &ResolveArgs,
) -> Result<(), CommandError> {
    let preview = preview_open_matches(state, plan, &args.patterns);
    if preview <= BATCH_WONTFIX_LIMIT || args.confirm_batch_wontfix {
        return Ok(());
    }
    // Estimate the strict debt the batch would lock in.
    let mut preview_state = state.clone();
    apply_all_patterns(&mut preview_state, plan, args, Status::Wontfix);
    refresh_dimension_scores(&mut preview_state);
    let before = score_snapshot(state).strict;
    let after = score_snapshot(&preview_state).strict;
    let delta = round1((before - after).max(0.0));
    Err(CommandError::validation(format!(
        "Large wontfix batch detected ({preview} findings). Estimated strict-score debt added \
now: {delta} points. Re-run with --confirm-batch-wontfix if this debt is intentional."
    )))
}

pub fn cmd_resolve(rt: &Runtime, args: &ResolveArgs) -> Result<QueryPayload, CommandError> {
    let (mut state, mut plan) = rt.load_stores();
    require_completed_scan(&state)?;

    let target = parse_target_status(&args.status)?;
    if target == Status::Wontfix && args.note.is_none() {
        return Err(CommandError::validation(
            "Wontfix items become technical debt. Add --note to record your reasoning for \
future review.",
        ));
    }
    if target != Status::Open && !validate_attestation(args.attest.as_deref()) {
        return Err(CommandError::validation(attestation_requirement(
            "Manual resolve",
            args.attest.as_deref(),
        )));
    }
    if target == Status::Wontfix {
        enforce_batch_wontfix(&state, &plan, args)?;
    }

    let prev_scores = score_snapshot(&state);
    let affected = apply_all_patterns(&mut state, &plan, args, target);
    if affected.is_empty() {
        let what = if target == Status::Open { "resolved" } else { "open" };
        return Err(CommandError::referential(format!(
            "No {what} findings matching: {}",
            args.patterns.join(" ")
        )));
    }

    refresh_dimension_scores(&mut state);
    let scores = score_snapshot(&state);

    if target == Status::Open {
        // Reopened findings come back to the end of the queue.
        for fid in &affected {
            plan.skipped.remove(fid);
            if !plan.queue_order.contains(fid) {
                plan.queue_order.push(fid.clone());
            }
        }
    } else {
        plan::purge_ids(&mut plan, &affected);
    }
    plan::refresh_plan_cycle(&mut plan, scores);
    rt.commit(Some(&mut state), Some(&mut plan))?;

    Ok(QueryPayload::new("resolve")
        .set("patterns", &args.patterns)
        .set("status", target.token())
        .set("resolved", &affected)
        .set("count", affected.len())
        .set("attestation", &args.attest)
        .set("strict_delta", round1(scores.strict - prev_scores.strict))
        .with_scores(scores)
        .with_prev_scores(prev_scores))
}

/// `plan done` sugar: resolve as fixed, with `--confirm` deriving the
/// attestation from the note.
pub fn cmd_plan_done(
    rt: &Runtime,
    patterns: Vec<String>,
    note: Option<String>,
    attest: Option<String>,
    confirm: bool,
) -> Result<QueryPayload, CommandError> {
    let attest = if confirm {
        let Some(note) = note.as_deref() else {
            return Err(CommandError::validation(
                "--confirm requires --note to describe what you did.",
            ));
        };
        Some(format!(
            "I have actually {note} and I am not gaming the score."
        ))
    } else {
        attest
    };
    if !validate_attestation(attest.as_deref()) {
        return Err(CommandError::validation(attestation_requirement(
            "Plan done",
            attest.as_deref(),
        )));
    }
    cmd_resolve(
        rt,
        &ResolveArgs {
            patterns,
            status: "fixed".to_string(),
            note,
            attest,
            confirm_batch_wontfix: false,
        },
    )
}

/// Add an ignore pattern and suppress matching findings. The findings stay
/// in the store and keep counting against strict scores.
pub fn cmd_ignore(
    rt: &mut Runtime,
    pattern: &str,
    note: Option<&str>,
    attest: Option<&str>,
) -> Result<QueryPayload, CommandError> {
    if !validate_attestation(attest) {
        return Err(CommandError::validation(attestation_requirement(
            "Ignore", attest,
        )));
    }
    let (mut state, mut plan) = rt.load_stores();

    let now = utc_now();
    rt.config.add_ignore_pattern(pattern, note, &now);
    crate::config::save_config(&rt.config, &rt.config_path())?;

    let summary = sync_suppressions(&mut state, &rt.config.ignore);
    state.attestation_log.push(AttestationEntry {
        timestamp: now,
        command: "ignore".to_string(),
        pattern: pattern.to_string(),
        attestation: attest.map(str::to_string),
        affected: summary.suppressed.len(),
    });

    // Suppressed findings leave the visible queue.
    plan::purge_ids(&mut plan, &summary.suppressed);
    refresh_dimension_scores(&mut state);
    let scores = score_snapshot(&state);
    plan::refresh_plan_cycle(&mut plan, scores);
    rt.commit(Some(&mut state), Some(&mut plan))?;

    Ok(QueryPayload::new("ignore")
        .set("pattern", pattern)
        .set("suppressed", &summary.suppressed)
        .set("attestation", attest)
        .with_scores(scores))
}

/// Shared skip flow for `plan skip`: permanent and false-positive skips also
/// resolve the finding in state, committed as one transaction with the plan.
pub fn apply_skip(
    rt: &Runtime,
    state: &mut State,
    plan: &mut Plan,
    finding_ids: &[String],
    kind: plan::SkipKind,
    reason: Option<&str>,
    note: Option<&str>,
    attest: Option<&str>,
    review_after: Option<u32>,
) -> Result<usize, CommandError> {
    let scan_count = state.scan_count;
    let count = plan::skip_items(
        plan,
        finding_ids,
        kind,
        reason,
        note,
        attest,
        review_after,
        scan_count,
    )?;

    if kind.resolves_state() {
        let status = match kind {
            plan::SkipKind::Permanent => Status::Wontfix,
            _ => Status::FalsePositive,
        };
        for fid in finding_ids {
            if Plan::is_synthetic_id(fid) {
                continue;
            }
            resolve_findings(state, fid, status, note, attest);
        }
        refresh_dimension_scores(state);
    }

    let scores = score_snapshot(state);
    plan::refresh_plan_cycle(plan, scores);
    rt.commit(Some(state), Some(plan))?;
    Ok(count)
}
