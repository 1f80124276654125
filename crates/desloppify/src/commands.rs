//! Command layer: each command loads a coherent snapshot of both stores,
//! mutates in memory, commits through the journal at most once per store,
//! and returns one structured payload.

use crate::errors::CommandError;
use crate::plan::Plan;
use crate::state::{State, StatusFilter, match_findings};

mod plan_cmds;
mod resolve;
mod synthesize;
mod views;

pub use plan_cmds::{
    ClusterAction, PlanSkipArgs, cmd_plan_cluster, cmd_plan_describe, cmd_plan_focus,
    cmd_plan_move, cmd_plan_note, cmd_plan_queue, cmd_plan_reopen, cmd_plan_skip,
    cmd_plan_status, cmd_plan_unskip,
};
pub use resolve::{ResolveArgs, cmd_ignore, cmd_plan_done, cmd_resolve};
pub use synthesize::{SynthesizeArgs, cmd_synthesize};
pub use views::{NextArgs, cmd_config_get, cmd_config_list, cmd_config_set, cmd_config_unset, cmd_next, cmd_scan, cmd_status};

/// Plan/resolve surfaces refuse to run against a store that has never seen a
/// scan.
fn require_completed_scan(state: &State) -> Result<(), CommandError> {
    if state.scan_count == 0 {
        return Err(CommandError::validation(
            "No completed scan yet; run `desloppify scan` first.",
        ));
    }
    Ok(())
}

/// Expand user patterns into finding ids: cluster names expand to their
/// members, everything else goes through finding-pattern matching. Order is
/// preserved and duplicates dropped.
fn resolve_ids_from_patterns(
    state: &State,
    plan: &Plan,
    patterns: &[String],
    status_filter: StatusFilter,
) -> Vec<String> {
    let mut ids: Vec<String> = vec![];
    let mut push = |id: String, ids: &mut Vec<String>| {
        if !ids.contains(&id) {
            ids.push(id);
        }
    };

    for pattern in patterns {
        if let Some(cluster) = plan.clusters.get(pattern) {
            for fid in &cluster.finding_ids {
                push(fid.clone(), &mut ids);
            }
            continue;
        }
        // Synthetic ids live only in the plan.
        if Plan::is_synthetic_id(pattern) {
            push(pattern.clone(), &mut ids);
            continue;
        }
        for finding in match_findings(state, pattern, status_filter) {
            push(finding.id.clone(), &mut ids);
        }
    }
    ids
}
