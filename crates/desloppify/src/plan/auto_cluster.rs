//! Deterministic auto-clustering of open findings into `auto/` task
//! clusters, keyed so regeneration updates rather than duplicates.

use crate::detectors::{self, ActionType, DetectorMeta};
use crate::plan::subjective_sync::current_unscored_ids;
use crate::plan::{AUTO_PREFIX, Cluster, Plan, SUBJECTIVE_PREFIX};
use crate::state::{Finding, State, Status, utc_now};
use std::collections::{BTreeMap, BTreeSet};

const MIN_CLUSTER_SIZE: usize = 2;
const MIN_UNSCORED_CLUSTER_SIZE: usize = 1;
const STALE_KEY: &str = "subjective::stale";
const STALE_NAME: &str = "auto/stale-review";
const UNSCORED_KEY: &str = "subjective::unscored";
const UNSCORED_NAME: &str = "auto/initial-review";

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Subtype from `detail.kind`, else the id tail when it does not look like a
/// path or symbol.
fn extract_subtype(finding: &Finding) -> Option<String> {
    if let Some(kind) = finding.detail.get("kind").and_then(|v| v.as_str()) {
        if !kind.is_empty() {
            return Some(kind.to_string());
        }
    }
    let candidate = finding.id.rsplit("::").next().unwrap_or("");
    if !candidate.is_empty() && !candidate.contains('/') && !candidate.contains('.') {
        return Some(candidate.to_string());
    }
    None
}

fn grouping_key(finding: &Finding, meta: Option<&DetectorMeta>) -> String {
    let detector = finding.detector.as_str();
    let Some(meta) = meta else {
        return format!("detector::{detector}");
    };

    if detector == "review" || detector == "subjective_review" {
        if let Some(dimension) = finding.dimension_key().filter(|d| !d.is_empty()) {
            return format!("review::{dimension}");
        }
        return format!("detector::{detector}");
    }

    if meta.needs_judgment
        && matches!(detector, "structural" | "responsibility_cohesion")
        && !finding.file.is_empty()
    {
        return format!("file::{detector}::{}", basename(&finding.file));
    }

    if meta.needs_judgment {
        if let Some(subtype) = extract_subtype(finding) {
            return format!("typed::{detector}::{subtype}");
        }
    }

    if meta.action_type == ActionType::AutoFix && !meta.needs_judgment {
        return format!("auto::{detector}");
    }

    format!("detector::{detector}")
}

fn cluster_name_from_key(key: &str) -> String {
    let parts: Vec<&str> = key.split("::").collect();
    match parts.as_slice() {
        ["review", rest] => format!("{AUTO_PREFIX}review-{rest}"),
        [_, rest] => format!("{AUTO_PREFIX}{rest}"),
        [_, a, b] => format!("{AUTO_PREFIX}{a}-{b}"),
        _ => format!("{AUTO_PREFIX}{}", key.replace("::", "-")),
    }
}

fn generate_description(
    members: &[&Finding],
    meta: Option<&DetectorMeta>,
    subtype: Option<&str>,
) -> String {
    let count = members.len();
    let detector = members.first().map(|f| f.detector.as_str()).unwrap_or("");

    if detector == "review" || detector == "subjective_review" {
        let dimension = members
            .first()
            .and_then(|f| f.dimension_key())
            .unwrap_or_else(|| detector.to_string());
        return format!("Address {count} {dimension} review findings");
    }

    if detector == "structural" {
        let files: BTreeSet<&str> = members.iter().map(|f| basename(&f.file)).collect();
        if files.len() == 1 {
            return format!("Decompose {}", files.iter().next().unwrap());
        }
        return format!("Decompose {count} large files");
    }

    let display = meta.map(|m| m.display).unwrap_or(detector);
    if let Some(subtype) = subtype {
        let label = subtype.replace('_', " ");
        return format!("Fix {count} {label} issues");
    }
    if let Some(meta) = meta
        && meta.action_type == ActionType::AutoFix
        && !meta.needs_judgment
    {
        return format!("Remove {count} {display} findings");
    }
    format!("Fix {count} {display} issues")
}

fn subtype_fixer(meta: &DetectorMeta, subtype: &str) -> Option<&'static str> {
    if meta.fixers.is_empty() || subtype.is_empty() {
        return None;
    }
    let fixer_name = subtype.replace('_', "-");
    meta.fixers
        .iter()
        .find(|f| **f == fixer_name)
        .or_else(|| meta.fixers.iter().find(|f| f.contains(subtype)))
        .copied()
}

/// Guidance strings use "verb — specific examples"; keep the verb.
fn strip_guidance_examples(guidance: &str) -> &str {
    guidance.split(" — ").next().unwrap_or(guidance).trim()
}

fn generate_action(meta: Option<&DetectorMeta>, subtype: Option<&str>) -> String {
    let Some(meta) = meta else {
        return "review and fix each finding".to_string();
    };

    if let Some(subtype) = subtype {
        if let Some(fixer) = subtype_fixer(meta, subtype) {
            return format!("desloppify fix {fixer} --dry-run");
        }
    } else if meta.action_type == ActionType::AutoFix
        && !meta.fixers.is_empty()
        && !meta.needs_judgment
    {
        return format!("desloppify fix {} --dry-run", meta.fixers[0]);
    }

    if meta.tool == Some("move") {
        return "desloppify move".to_string();
    }

    if let Some(guidance) = meta.guidance {
        if subtype.is_some() {
            return strip_guidance_examples(guidance).to_string();
        }
        return guidance.to_string();
    }

    match meta.action_type {
        ActionType::Reorganize => "reorganize with desloppify move".to_string(),
        ActionType::Refactor => "review and refactor each finding".to_string(),
        _ => "review and fix each finding".to_string(),
    }
}

fn track_membership(plan: &mut Plan, member_ids: &[String], cluster_name: &str, now: &str) {
    for fid in member_ids {
        let entry = plan
            .overrides
            .entry(fid.clone())
            .or_insert_with(|| crate::plan::ItemOverride {
                finding_id: fid.clone(),
                created_at: now.to_string(),
                ..Default::default()
            });
        entry.cluster = Some(cluster_name.to_string());
        entry.updated_at = now.to_string();
    }
}

/// Upsert one auto-cluster for `key`; respects `user_modified` membership.
#[allow(clippy::too_many_arguments)]
fn upsert_auto_cluster(
    plan: &mut Plan,
    existing_by_key: &mut BTreeMap<String, String>,
    key: &str,
    preferred_name: String,
    member_ids: Vec<String>,
    description: String,
    action: String,
    now: &str,
) -> usize {
    let mut changes = 0;
    let existing_name = existing_by_key.get(key).cloned();

    if let Some(name) = existing_name.filter(|n| plan.clusters.contains_key(n)) {
        let cluster = plan.clusters.get_mut(&name).unwrap();
        if cluster.user_modified {
            // Merge new findings in without undoing the user's edits.
            let known: BTreeSet<&String> = cluster.finding_ids.iter().collect();
            let fresh: Vec<String> = member_ids
                .iter()
                .filter(|fid| !known.contains(fid))
                .cloned()
                .collect();
            if !fresh.is_empty() {
                cluster.finding_ids.extend(fresh);
                cluster.updated_at = now.to_string();
                changes += 1;
            }
        } else if cluster.finding_ids != member_ids
            || cluster.description.as_deref() != Some(description.as_str())
            || cluster.action.as_deref() != Some(action.as_str())
        {
            cluster.finding_ids = member_ids.clone();
            cluster.description = Some(description);
            cluster.action = Some(action);
            cluster.updated_at = now.to_string();
            changes += 1;
        }
        track_membership(plan, &member_ids, &name, now);
        return changes;
    }

    // Name collision with a different key gets a disambiguator.
    let name = if plan
        .clusters
        .get(&preferred_name)
        .is_some_and(|c| c.cluster_key != key)
    {
        format!("{preferred_name}-{}", member_ids.len())
    } else {
        preferred_name
    };

    let mut cluster = Cluster::new(&name, now);
    cluster.description = Some(description);
    cluster.finding_ids = member_ids.clone();
    cluster.auto = true;
    cluster.cluster_key = key.to_string();
    cluster.action = Some(action);
    plan.clusters.insert(name.clone(), cluster);
    existing_by_key.insert(key.to_string(), name.clone());
    track_membership(plan, &member_ids, &name, now);
    changes + 1
}

/// Regenerate auto-clusters from current open, non-suppressed findings.
/// Returns count of clusters created, updated, or deleted.
pub fn auto_cluster_findings(plan: &mut Plan, state: &State) -> usize {
    let mut changes = 0;
    let now = utc_now();

    let manual_member_ids: BTreeSet<String> = plan
        .clusters
        .values()
        .filter(|c| !c.auto)
        .flat_map(|c| c.finding_ids.iter().cloned())
        .collect();

    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (fid, finding) in &state.findings {
        if finding.status != Status::Open || finding.suppressed {
            continue;
        }
        if manual_member_ids.contains(fid) {
            continue;
        }
        let meta = detectors::lookup(&finding.detector);
        let key = grouping_key(finding, meta);
        groups.entry(key).or_default().push(fid.clone());
    }
    groups.retain(|_, members| members.len() >= MIN_CLUSTER_SIZE);

    let mut existing_by_key: BTreeMap<String, String> = plan
        .clusters
        .iter()
        .filter(|(_, c)| c.auto && !c.cluster_key.is_empty())
        .map(|(name, c)| (c.cluster_key.clone(), name.clone()))
        .collect();

    let mut active_keys: BTreeSet<String> = BTreeSet::new();

    for (key, member_ids) in &groups {
        active_keys.insert(key.clone());

        let rep = member_ids
            .first()
            .and_then(|fid| state.findings.get(fid))
            .cloned();
        let meta = rep
            .as_ref()
            .and_then(|f| detectors::lookup(&f.detector));
        let members: Vec<&Finding> = member_ids
            .iter()
            .filter_map(|fid| state.findings.get(fid))
            .collect();

        let key_parts: Vec<&str> = key.split("::").collect();
        let subtype = if key_parts.len() >= 3 {
            Some(key_parts[2])
        } else {
            None
        };

        let description = generate_description(&members, meta, subtype);
        let action = generate_action(meta, subtype);
        changes += upsert_auto_cluster(
            plan,
            &mut existing_by_key,
            key,
            cluster_name_from_key(key),
            member_ids.clone(),
            description,
            action,
            &now,
        );
    }

    // Synthetic subjective clusters are built from queued subjective ids.
    let all_subjective: Vec<String> = plan
        .queue_order
        .iter()
        .filter(|fid| fid.starts_with(SUBJECTIVE_PREFIX))
        .cloned()
        .collect();
    let unscored_state_ids = current_unscored_ids(state);
    let mut unscored_queue: Vec<String> = all_subjective
        .iter()
        .filter(|fid| unscored_state_ids.contains(*fid))
        .cloned()
        .collect();
    unscored_queue.sort();
    let mut stale_queue: Vec<String> = all_subjective
        .iter()
        .filter(|fid| !unscored_state_ids.contains(*fid))
        .cloned()
        .collect();
    stale_queue.sort();

    if unscored_queue.len() >= MIN_UNSCORED_CLUSTER_SIZE {
        active_keys.insert(UNSCORED_KEY.to_string());
        let cli_keys: Vec<&str> = unscored_queue
            .iter()
            .map(|fid| fid.trim_start_matches(SUBJECTIVE_PREFIX))
            .collect();
        changes += upsert_auto_cluster(
            plan,
            &mut existing_by_key,
            UNSCORED_KEY,
            UNSCORED_NAME.to_string(),
            unscored_queue.clone(),
            format!(
                "Initial review of {} unscored subjective dimensions",
                unscored_queue.len()
            ),
            format!(
                "desloppify review --prepare --dimensions {}",
                cli_keys.join(",")
            ),
            &now,
        );
    }

    if stale_queue.len() >= MIN_CLUSTER_SIZE {
        active_keys.insert(STALE_KEY.to_string());
        let cli_keys: Vec<&str> = stale_queue
            .iter()
            .map(|fid| fid.trim_start_matches(SUBJECTIVE_PREFIX))
            .collect();
        changes += upsert_auto_cluster(
            plan,
            &mut existing_by_key,
            STALE_KEY,
            STALE_NAME.to_string(),
            stale_queue.clone(),
            format!("Re-review {} stale subjective dimensions", stale_queue.len()),
            format!(
                "desloppify review --prepare --dimensions {} --force-review-rerun",
                cli_keys.join(",")
            ),
            &now,
        );
    }

    // Drop auto-clusters whose key is gone; user-modified ones only lose
    // dead members, and disappear once empty.
    let candidates: Vec<String> = plan
        .clusters
        .iter()
        .filter(|(name, c)| {
            c.auto && !c.is_epic() && !active_keys.contains(&c.cluster_key) && !name.is_empty()
        })
        .map(|(name, _)| name.clone())
        .collect();

    for name in candidates {
        let cluster = plan.clusters.get(&name).unwrap();
        if cluster.user_modified {
            let alive: Vec<String> = cluster
                .finding_ids
                .iter()
                .filter(|fid| {
                    state
                        .findings
                        .get(*fid)
                        .is_some_and(|f| f.status == Status::Open)
                })
                .cloned()
                .collect();
            if !alive.is_empty() {
                let cluster = plan.clusters.get_mut(&name).unwrap();
                if alive.len() != cluster.finding_ids.len() {
                    cluster.finding_ids = alive;
                    cluster.updated_at = now.clone();
                    changes += 1;
                }
                continue;
            }
        }
        let removed = plan.clusters.remove(&name).unwrap();
        for fid in &removed.finding_ids {
            if let Some(entry) = plan.overrides.get_mut(fid)
                && entry.cluster.as_deref() == Some(name.as_str())
            {
                entry.cluster = None;
                entry.updated_at = now.clone();
            }
        }
        if plan.active_cluster.as_deref() == Some(name.as_str()) {
            plan.active_cluster = None;
        }
        changes += 1;
    }

    plan.updated = now;
    changes
}
