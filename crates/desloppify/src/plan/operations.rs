//! Pure mutation operations on the plan model.

use crate::attest::{attestation_requirement, validate_attestation};
use crate::errors::CommandError;
use crate::plan::{AUTO_PREFIX, Cluster, EPIC_PREFIX, Plan, SkipEntry, SkipKind};
use crate::scoring::ScoreSnapshot;
use crate::state::utc_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovePosition {
    Top,
    Bottom,
    Before,
    After,
    Up,
    Down,
}

impl MovePosition {
    pub fn parse(token: &str) -> Option<MovePosition> {
        match token {
            "top" => Some(MovePosition::Top),
            "bottom" => Some(MovePosition::Bottom),
            "before" => Some(MovePosition::Before),
            "after" => Some(MovePosition::After),
            "up" => Some(MovePosition::Up),
            "down" => Some(MovePosition::Down),
            _ => None,
        }
    }
}

fn resolve_position(
    order: &[String],
    position: MovePosition,
    target: Option<&str>,
    offset: Option<usize>,
    current: Option<usize>,
) -> usize {
    match position {
        MovePosition::Top => 0,
        MovePosition::Bottom => order.len(),
        MovePosition::Before => match target {
            Some(target) => order.iter().position(|id| id == target).unwrap_or(0),
            None => 0,
        },
        MovePosition::After => match target {
            Some(target) => order
                .iter()
                .position(|id| id == target)
                .map(|i| i + 1)
                .unwrap_or(order.len()),
            None => order.len(),
        },
        MovePosition::Up => {
            let offset = offset.unwrap_or(1);
            current
                .map(|idx| idx.saturating_sub(offset))
                .unwrap_or_else(|| order.len().saturating_sub(offset))
        }
        MovePosition::Down => {
            let offset = offset.unwrap_or(1);
            current
                .map(|idx| (idx + offset).min(order.len()))
                .unwrap_or(order.len())
        }
    }
}

/// Move finding ids to a position in `queue_order`. Moved ids leave the
/// skipped map. Returns count moved.
pub fn move_items(
    plan: &mut Plan,
    finding_ids: &[String],
    position: MovePosition,
    target: Option<&str>,
    offset: Option<usize>,
) -> usize {
    for fid in finding_ids {
        plan.skipped.remove(fid);
    }
    // Index of the first moved id among the items that stay, for up/down.
    let current = finding_ids.first().and_then(|first| {
        let mut idx = 0usize;
        for id in &plan.queue_order {
            if id == first {
                return Some(idx);
            }
            if !finding_ids.contains(id) {
                idx += 1;
            }
        }
        None
    });
    plan.queue_order.retain(|id| !finding_ids.contains(id));
    let idx = resolve_position(&plan.queue_order, position, target, offset, current);
    for (i, fid) in finding_ids.iter().enumerate() {
        plan.queue_order.insert(idx + i, fid.clone());
    }
    finding_ids.len()
}

/// Move finding ids into the skipped map. Permanent skips require a note and
/// an attestation; false-positive skips require an attestation.
pub fn skip_items(
    plan: &mut Plan,
    finding_ids: &[String],
    kind: SkipKind,
    reason: Option<&str>,
    note: Option<&str>,
    attestation: Option<&str>,
    review_after: Option<u32>,
    scan_count: u32,
) -> Result<usize, CommandError> {
    if kind.resolves_state() && !validate_attestation(attestation) {
        let label = match kind {
            SkipKind::Permanent => "Permanent skip",
            _ => "False positive",
        };
        return Err(CommandError::validation(attestation_requirement(
            label,
            attestation,
        )));
    }
    if kind == SkipKind::Permanent && note.is_none() {
        return Err(CommandError::validation(
            "Permanent skip requires --note to explain the decision.",
        ));
    }

    let now = utc_now();
    for fid in finding_ids {
        plan.queue_order.retain(|id| id != fid);
        plan.skipped.insert(
            fid.clone(),
            SkipEntry {
                finding_id: fid.clone(),
                kind,
                reason: reason.map(str::to_string),
                note: note.map(str::to_string),
                attestation: attestation.map(str::to_string),
                created_at: now.clone(),
                review_after,
                skipped_at_scan: scan_count,
            },
        );
    }
    Ok(finding_ids.len())
}

/// Bring finding ids back from skipped to the end of the queue. The second
/// list is ids whose skip also resolved them in state; the caller reopens
/// those.
pub fn unskip_items(plan: &mut Plan, finding_ids: &[String]) -> (usize, Vec<String>) {
    let mut count = 0;
    let mut need_reopen = vec![];
    for fid in finding_ids {
        let Some(entry) = plan.skipped.remove(fid) else {
            continue;
        };
        if entry.kind.resolves_state() {
            need_reopen.push(fid.clone());
        }
        if !plan.queue_order.contains(fid) {
            plan.queue_order.push(fid.clone());
        }
        count += 1;
    }
    (count, need_reopen)
}

/// Promote temporary skips past their `skipped_at_scan + review_after`
/// threshold back into the queue. Returns resurfaced ids.
pub fn resurface_stale_skips(plan: &mut Plan, current_scan_count: u32) -> Vec<String> {
    let due: Vec<String> = plan
        .skipped
        .iter()
        .filter(|(_, entry)| {
            entry.kind == SkipKind::Temporary
                && entry
                    .review_after
                    .is_some_and(|after| current_scan_count >= entry.skipped_at_scan + after)
        })
        .map(|(fid, _)| fid.clone())
        .collect();

    for fid in &due {
        plan.skipped.remove(fid);
        if !plan.queue_order.contains(fid) {
            plan.queue_order.push(fid.clone());
        }
    }
    due
}

fn touch_override<'a>(
    plan: &'a mut Plan,
    finding_id: &str,
    now: &str,
) -> &'a mut crate::plan::ItemOverride {
    let entry = plan
        .overrides
        .entry(finding_id.to_string())
        .or_insert_with(|| crate::plan::ItemOverride {
            finding_id: finding_id.to_string(),
            created_at: now.to_string(),
            ..Default::default()
        });
    entry.updated_at = now.to_string();
    entry
}

/// Set or clear an augmented description on a finding.
pub fn describe_finding(plan: &mut Plan, finding_id: &str, description: Option<&str>) {
    let now = utc_now();
    let entry = touch_override(plan, finding_id, &now);
    entry.description = description.map(str::to_string);
}

/// Set or clear a note on a finding.
pub fn annotate_finding(plan: &mut Plan, finding_id: &str, note: Option<&str>) {
    let now = utc_now();
    let entry = touch_override(plan, finding_id, &now);
    entry.note = note.map(str::to_string);
}

fn reject_reserved_name(name: &str) -> Result<(), CommandError> {
    if name.starts_with(AUTO_PREFIX) {
        return Err(CommandError::validation(format!(
            "Cluster names starting with '{AUTO_PREFIX}' are reserved for auto-clusters: {name:?}"
        )));
    }
    if name.starts_with(EPIC_PREFIX) {
        return Err(CommandError::validation(format!(
            "Cluster names starting with '{EPIC_PREFIX}' are reserved for synthesis epics: {name:?}"
        )));
    }
    Ok(())
}

pub fn create_cluster(
    plan: &mut Plan,
    name: &str,
    description: Option<&str>,
    action: Option<&str>,
) -> Result<(), CommandError> {
    reject_reserved_name(name)?;
    if plan.clusters.contains_key(name) {
        return Err(CommandError::validation(format!(
            "Cluster {name:?} already exists"
        )));
    }
    let now = utc_now();
    let mut cluster = Cluster::new(name, &now);
    cluster.description = description.map(str::to_string);
    cluster.action = action.map(str::to_string);
    plan.clusters.insert(name.to_string(), cluster);
    Ok(())
}

pub fn add_to_cluster(
    plan: &mut Plan,
    cluster_name: &str,
    finding_ids: &[String],
) -> Result<usize, CommandError> {
    if !plan.clusters.contains_key(cluster_name) {
        return Err(CommandError::referential(format!(
            "Cluster {cluster_name:?} does not exist"
        )));
    }
    let now = utc_now();
    let mut count = 0;
    {
        let cluster = plan.clusters.get_mut(cluster_name).unwrap();
        for fid in finding_ids {
            if !cluster.finding_ids.contains(fid) {
                cluster.finding_ids.push(fid.clone());
                count += 1;
            }
        }
        cluster.updated_at = now.clone();
    }
    for fid in finding_ids {
        let entry = touch_override(plan, fid, &now);
        entry.cluster = Some(cluster_name.to_string());
    }
    Ok(count)
}

pub fn remove_from_cluster(
    plan: &mut Plan,
    cluster_name: &str,
    finding_ids: &[String],
) -> Result<usize, CommandError> {
    if !plan.clusters.contains_key(cluster_name) {
        return Err(CommandError::referential(format!(
            "Cluster {cluster_name:?} does not exist"
        )));
    }
    let now = utc_now();
    let mut count = 0;
    {
        let cluster = plan.clusters.get_mut(cluster_name).unwrap();
        for fid in finding_ids {
            let before = cluster.finding_ids.len();
            cluster.finding_ids.retain(|id| id != fid);
            if cluster.finding_ids.len() != before {
                count += 1;
            }
        }
        // Manual membership edits pin auto-clusters against regeneration.
        if count > 0 && cluster.auto {
            cluster.user_modified = true;
        }
        cluster.updated_at = now.clone();
    }
    for fid in finding_ids {
        if let Some(entry) = plan.overrides.get_mut(fid)
            && entry.cluster.as_deref() == Some(cluster_name)
        {
            entry.cluster = None;
            entry.updated_at = now.clone();
        }
    }
    Ok(count)
}

/// Delete a cluster and clear its override refs. Returns orphaned member ids.
pub fn delete_cluster(plan: &mut Plan, name: &str) -> Result<Vec<String>, CommandError> {
    let Some(cluster) = plan.clusters.remove(name) else {
        return Err(CommandError::referential(format!(
            "Cluster {name:?} does not exist"
        )));
    };
    let now = utc_now();
    let orphaned = cluster.finding_ids.clone();
    for fid in &orphaned {
        if let Some(entry) = plan.overrides.get_mut(fid)
            && entry.cluster.as_deref() == Some(name)
        {
            entry.cluster = None;
            entry.updated_at = now.clone();
        }
    }
    if plan.active_cluster.as_deref() == Some(name) {
        plan.active_cluster = None;
    }
    Ok(orphaned)
}

/// Update description / action / action steps on an existing cluster.
pub fn update_cluster(
    plan: &mut Plan,
    name: &str,
    description: Option<&str>,
    action: Option<&str>,
    action_steps: Option<&[String]>,
) -> Result<(), CommandError> {
    let Some(cluster) = plan.clusters.get_mut(name) else {
        return Err(CommandError::referential(format!(
            "Cluster {name:?} does not exist"
        )));
    };
    if let Some(description) = description {
        cluster.description = Some(description.to_string());
    }
    if let Some(action) = action {
        cluster.action = Some(action.to_string());
    }
    if let Some(steps) = action_steps {
        cluster.action_steps = steps.to_vec();
    }
    cluster.updated_at = utc_now();
    Ok(())
}

/// Move all cluster members as a contiguous block.
pub fn move_cluster(
    plan: &mut Plan,
    cluster_name: &str,
    position: MovePosition,
    target: Option<&str>,
    offset: Option<usize>,
) -> Result<usize, CommandError> {
    let Some(cluster) = plan.clusters.get(cluster_name) else {
        return Err(CommandError::referential(format!(
            "Cluster {cluster_name:?} does not exist"
        )));
    };
    let member_ids = cluster.finding_ids.clone();
    if member_ids.is_empty() {
        return Ok(0);
    }
    Ok(move_items(plan, &member_ids, position, target, offset))
}

pub fn set_focus(plan: &mut Plan, cluster_name: &str) -> Result<(), CommandError> {
    if !plan.clusters.contains_key(cluster_name) {
        return Err(CommandError::referential(format!(
            "Cluster {cluster_name:?} does not exist"
        )));
    }
    plan.active_cluster = Some(cluster_name.to_string());
    Ok(())
}

pub fn clear_focus(plan: &mut Plan) {
    plan.active_cluster = None;
}

/// Remove finding ids from queue, skipped, and all cluster memberships.
/// Overrides are kept for history. Returns count of ids actually present.
pub fn purge_ids(plan: &mut Plan, finding_ids: &[String]) -> usize {
    let mut found = 0;
    for fid in finding_ids {
        let mut present = false;
        let before = plan.queue_order.len();
        plan.queue_order.retain(|id| id != fid);
        present |= plan.queue_order.len() != before;
        present |= plan.skipped.remove(fid).is_some();
        for cluster in plan.clusters.values_mut() {
            let before = cluster.finding_ids.len();
            cluster.finding_ids.retain(|id| id != fid);
            present |= cluster.finding_ids.len() != before;
        }
        if present {
            found += 1;
        }
    }
    found
}

/// Reset to an empty plan, preserving the created timestamp.
pub fn reset_plan(plan: &mut Plan) {
    let created = plan.created.clone();
    *plan = Plan::default();
    plan.created = created;
}

/// Freeze a score snapshot when a plan cycle begins (queue becomes
/// non-empty) and release it once the queue drains.
pub fn refresh_plan_cycle(plan: &mut Plan, snapshot: ScoreSnapshot) {
    if plan.queue_order.is_empty() {
        plan.plan_start_scores = None;
    } else if plan.plan_start_scores.is_none() {
        plan.plan_start_scores = Some(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATTEST: &str = "I have actually verified this by hand and I am not gaming the score.";

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn plan_with_queue(list: &[&str]) -> Plan {
        let mut plan = Plan::default();
        plan.queue_order = ids(list);
        plan
    }

    #[test]
    fn move_to_top_and_bottom() {
        let mut plan = plan_with_queue(&["a", "b", "c"]);
        move_items(&mut plan, &ids(&["c"]), MovePosition::Top, None, None);
        assert_eq!(plan.queue_order, ids(&["c", "a", "b"]));
        move_items(&mut plan, &ids(&["c"]), MovePosition::Bottom, None, None);
        assert_eq!(plan.queue_order, ids(&["a", "b", "c"]));
    }

    #[test]
    fn move_before_and_after_target() {
        let mut plan = plan_with_queue(&["a", "b", "c"]);
        move_items(&mut plan, &ids(&["c"]), MovePosition::Before, Some("b"), None);
        assert_eq!(plan.queue_order, ids(&["a", "c", "b"]));
        move_items(&mut plan, &ids(&["a"]), MovePosition::After, Some("b"), None);
        assert_eq!(plan.queue_order, ids(&["c", "b", "a"]));
    }

    #[test]
    fn move_up_and_down_by_offset() {
        let mut plan = plan_with_queue(&["a", "b", "c", "d"]);
        move_items(&mut plan, &ids(&["c"]), MovePosition::Up, None, Some(2));
        assert_eq!(plan.queue_order, ids(&["c", "a", "b", "d"]));
        move_items(&mut plan, &ids(&["c"]), MovePosition::Down, None, Some(1));
        assert_eq!(plan.queue_order, ids(&["a", "c", "b", "d"]));
    }

    #[test]
    fn move_unskips_moved_ids() {
        let mut plan = plan_with_queue(&["a"]);
        skip_items(
            &mut plan,
            &ids(&["b"]),
            SkipKind::Temporary,
            None,
            None,
            None,
            None,
            0,
        )
        .unwrap();
        move_items(&mut plan, &ids(&["b"]), MovePosition::Top, None, None);
        assert!(plan.skipped.is_empty());
        assert_eq!(plan.queue_order, ids(&["b", "a"]));
    }

    #[test]
    fn skip_then_unskip_round_trips() {
        let mut plan = plan_with_queue(&["a", "b"]);
        skip_items(
            &mut plan,
            &ids(&["a"]),
            SkipKind::Temporary,
            Some("later"),
            None,
            None,
            Some(3),
            5,
        )
        .unwrap();
        assert!(!plan.queue_order.contains(&"a".to_string()));
        assert_eq!(plan.skipped["a"].skipped_at_scan, 5);

        let (count, need_reopen) = unskip_items(&mut plan, &ids(&["a"]));
        assert_eq!(count, 1);
        assert!(need_reopen.is_empty());
        assert_eq!(plan.queue_order, ids(&["b", "a"]));
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn permanent_skip_requires_note_and_attestation() {
        let mut plan = plan_with_queue(&["a"]);
        let err = skip_items(
            &mut plan,
            &ids(&["a"]),
            SkipKind::Permanent,
            None,
            None,
            Some(ATTEST),
            None,
            0,
        )
        .unwrap_err();
        assert!(err.to_string().contains("--note"));

        let err = skip_items(
            &mut plan,
            &ids(&["a"]),
            SkipKind::Permanent,
            None,
            Some("documented"),
            Some("nope"),
            None,
            0,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not gaming"));
        assert!(plan.skipped.is_empty());
        assert_eq!(plan.queue_order, ids(&["a"]));
    }

    #[test]
    fn false_positive_skip_requires_attestation_only() {
        let mut plan = plan_with_queue(&["a"]);
        skip_items(
            &mut plan,
            &ids(&["a"]),
            SkipKind::FalsePositive,
            None,
            None,
            Some(ATTEST),
            None,
            0,
        )
        .unwrap();
        let (_, need_reopen) = unskip_items(&mut plan, &ids(&["a"]));
        assert_eq!(need_reopen, ids(&["a"]));
    }

    #[test]
    fn stale_temporary_skips_resurface() {
        let mut plan = Plan::default();
        skip_items(
            &mut plan,
            &ids(&["a"]),
            SkipKind::Temporary,
            None,
            None,
            None,
            Some(2),
            4,
        )
        .unwrap();
        assert!(resurface_stale_skips(&mut plan, 5).is_empty());
        let resurfaced = resurface_stale_skips(&mut plan, 6);
        assert_eq!(resurfaced, ids(&["a"]));
        assert_eq!(plan.queue_order, ids(&["a"]));
    }

    #[test]
    fn temporary_skip_without_review_after_stays_put() {
        let mut plan = Plan::default();
        skip_items(
            &mut plan,
            &ids(&["a"]),
            SkipKind::Temporary,
            None,
            None,
            None,
            None,
            0,
        )
        .unwrap();
        assert!(resurface_stale_skips(&mut plan, 100).is_empty());
    }

    #[test]
    fn manual_cluster_path_rejects_reserved_prefixes() {
        let mut plan = Plan::default();
        assert!(create_cluster(&mut plan, "auto/unused", None, None).is_err());
        assert!(create_cluster(&mut plan, "epic/rewrite", None, None).is_err());
        assert!(create_cluster(&mut plan, "cleanup", Some("tidy"), None).is_ok());
        assert!(create_cluster(&mut plan, "cleanup", None, None).is_err());
    }

    #[test]
    fn cluster_membership_tracks_overrides() {
        let mut plan = Plan::default();
        create_cluster(&mut plan, "cleanup", None, None).unwrap();
        add_to_cluster(&mut plan, "cleanup", &ids(&["a", "b"])).unwrap();
        assert_eq!(plan.overrides["a"].cluster.as_deref(), Some("cleanup"));

        remove_from_cluster(&mut plan, "cleanup", &ids(&["a"])).unwrap();
        assert_eq!(plan.overrides["a"].cluster, None);
        assert_eq!(plan.clusters["cleanup"].finding_ids, ids(&["b"]));
    }

    #[test]
    fn removing_from_auto_cluster_marks_user_modified() {
        let mut plan = Plan::default();
        let now = utc_now();
        let mut cluster = Cluster::new("auto/unused", &now);
        cluster.auto = true;
        cluster.finding_ids = ids(&["a", "b"]);
        plan.clusters.insert("auto/unused".to_string(), cluster);

        remove_from_cluster(&mut plan, "auto/unused", &ids(&["a"])).unwrap();
        assert!(plan.clusters["auto/unused"].user_modified);
    }

    #[test]
    fn delete_cluster_clears_focus_and_refs() {
        let mut plan = Plan::default();
        create_cluster(&mut plan, "cleanup", None, None).unwrap();
        add_to_cluster(&mut plan, "cleanup", &ids(&["a"])).unwrap();
        set_focus(&mut plan, "cleanup").unwrap();

        let orphaned = delete_cluster(&mut plan, "cleanup").unwrap();
        assert_eq!(orphaned, ids(&["a"]));
        assert!(plan.active_cluster.is_none());
        assert_eq!(plan.overrides["a"].cluster, None);
    }

    #[test]
    fn purge_removes_everywhere_but_keeps_overrides() {
        let mut plan = plan_with_queue(&["a", "b"]);
        create_cluster(&mut plan, "cleanup", None, None).unwrap();
        add_to_cluster(&mut plan, "cleanup", &ids(&["a"])).unwrap();
        let found = purge_ids(&mut plan, &ids(&["a", "zzz"]));
        assert_eq!(found, 1);
        assert_eq!(plan.queue_order, ids(&["b"]));
        assert!(plan.clusters["cleanup"].finding_ids.is_empty());
        assert!(plan.overrides.contains_key("a"));
    }

    #[test]
    fn reset_preserves_created_timestamp_only() {
        let mut plan = plan_with_queue(&["a"]);
        create_cluster(&mut plan, "cleanup", None, None).unwrap();
        let created = plan.created.clone();
        reset_plan(&mut plan);
        assert_eq!(plan.created, created);
        assert!(plan.queue_order.is_empty());
        assert!(plan.clusters.is_empty());
    }

    #[test]
    fn plan_cycle_freezes_until_queue_drains() {
        let mut plan = plan_with_queue(&["a"]);
        let start = ScoreSnapshot {
            overall: 70.0,
            objective: 60.0,
            strict: 50.0,
            verified: 40.0,
        };
        refresh_plan_cycle(&mut plan, start);
        assert_eq!(plan.plan_start_scores.unwrap().strict, 50.0);

        // A later, better snapshot does not overwrite the frozen one.
        refresh_plan_cycle(&mut plan, ScoreSnapshot::perfect());
        assert_eq!(plan.plan_start_scores.unwrap().strict, 50.0);

        plan.queue_order.clear();
        refresh_plan_cycle(&mut plan, ScoreSnapshot::perfect());
        assert!(plan.plan_start_scores.is_none());
    }
}
