//! Living plan store: the persistent, user-editable work model layered on
//! top of the finding store.

use crate::errors::PersistenceError;
use crate::journal;
use crate::scoring::ScoreSnapshot;
use crate::state::utc_now;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

mod auto_cluster;
mod operations;
mod reconcile;
mod subjective_sync;
mod synthesis;

pub use auto_cluster::auto_cluster_findings;
pub use operations::{
    MovePosition, add_to_cluster, annotate_finding, clear_focus, create_cluster, delete_cluster,
    describe_finding, move_cluster, move_items, purge_ids, refresh_plan_cycle, remove_from_cluster,
    reset_plan, resurface_stale_skips, set_focus, skip_items, unskip_items, update_cluster,
};
pub use reconcile::{ReconcileResult, SUPERSEDED_TTL_DAYS, reconcile_plan_after_scan};
pub use subjective_sync::{
    SubjectiveSyncResult, SynthesisSyncResult, review_finding_snapshot_hash,
    sync_stale_dimensions, sync_synthesis_needed, sync_unscored_dimensions,
};
pub use synthesis::{
    CompletionOutcome, DismissedFinding, EpicSpec, StageOutcome, SynthesisInput,
    SynthesisMutationResult, SynthesisResult, SynthesisStatus, apply_synthesis_to_plan,
    collect_synthesis_input, complete_synthesis, confirm_existing_synthesis,
    detect_recurring_patterns, extract_finding_citations, record_observe, record_organize,
    record_reflect, synthesis_status,
};

pub const PLAN_VERSION: u32 = 4;
pub const AUTO_PREFIX: &str = "auto/";
pub const EPIC_PREFIX: &str = "epic/";
pub const SUBJECTIVE_PREFIX: &str = "subjective::";
pub const SYNTHESIS_ID: &str = "synthesis::pending";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SkipKind {
    Temporary,
    Permanent,
    FalsePositive,
    SynthesizedOut,
}

impl SkipKind {
    pub fn token(self) -> &'static str {
        match self {
            SkipKind::Temporary => "temporary",
            SkipKind::Permanent => "permanent",
            SkipKind::FalsePositive => "false_positive",
            SkipKind::SynthesizedOut => "synthesized_out",
        }
    }

    pub fn parse(token: &str) -> Option<SkipKind> {
        match token {
            "temporary" => Some(SkipKind::Temporary),
            "permanent" => Some(SkipKind::Permanent),
            "false_positive" => Some(SkipKind::FalsePositive),
            "synthesized_out" => Some(SkipKind::SynthesizedOut),
            _ => None,
        }
    }

    /// Kinds that also resolve the finding in the state store, so unskipping
    /// must reopen it there.
    pub fn resolves_state(self) -> bool {
        matches!(self, SkipKind::Permanent | SkipKind::FalsePositive)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SkipEntry {
    pub finding_id: String,
    pub kind: SkipKind,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub attestation: Option<String>,
    #[serde(default)]
    pub created_at: String,
    /// Re-surface after this many scans (temporary skips only).
    #[serde(default)]
    pub review_after: Option<u32>,
    #[serde(default)]
    pub skipped_at_scan: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ItemOverride {
    pub finding_id: String,
    pub description: Option<String>,
    pub note: Option<String>,
    pub cluster: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub(crate) fn default_dependency_order() -> u32 {
    999
}

pub(crate) fn default_cluster_status() -> String {
    "pending".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Cluster {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub finding_ids: Vec<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    /// True for clusters the auto-cluster engine (or synthesis) owns.
    #[serde(default)]
    pub auto: bool,
    /// Deterministic grouping key used for regeneration.
    #[serde(default)]
    pub cluster_key: String,
    /// Primary resolution command / guidance text.
    #[serde(default)]
    pub action: Option<String>,
    /// Set when the user manually edits auto-cluster membership.
    #[serde(default)]
    pub user_modified: bool,
    // Synthesis-epic fields; defaulted for ordinary clusters.
    #[serde(default)]
    pub thesis: String,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub dismissed: Vec<String>,
    #[serde(default)]
    pub agent_safe: bool,
    #[serde(default = "default_dependency_order")]
    pub dependency_order: u32,
    #[serde(default)]
    pub action_steps: Vec<String>,
    #[serde(default = "default_cluster_status")]
    pub status: String,
    #[serde(default)]
    pub synthesis_version: u32,
}

impl Cluster {
    pub fn new(name: &str, now: &str) -> Cluster {
        Cluster {
            name: name.to_string(),
            description: None,
            finding_ids: vec![],
            created_at: now.to_string(),
            updated_at: now.to_string(),
            auto: false,
            cluster_key: String::new(),
            action: None,
            user_modified: false,
            thesis: String::new(),
            direction: None,
            root_cause: String::new(),
            dismissed: vec![],
            agent_safe: false,
            dependency_order: default_dependency_order(),
            action_steps: vec![],
            status: default_cluster_status(),
            synthesis_version: 0,
        }
    }

    pub fn is_epic(&self) -> bool {
        self.name.starts_with(EPIC_PREFIX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SupersededEntry {
    pub original_id: String,
    #[serde(default)]
    pub original_detector: String,
    #[serde(default)]
    pub original_file: String,
    #[serde(default)]
    pub original_summary: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub superseded_at: String,
    #[serde(default)]
    pub remapped_to: Option<String>,
    #[serde(default)]
    pub candidates: Vec<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StageRecord {
    pub stage: String,
    pub report: String,
    #[serde(default)]
    pub cited_ids: Vec<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub finding_count: usize,
    #[serde(default)]
    pub recurring_dimensions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SynthesisMeta {
    pub synthesized_ids: Vec<String>,
    pub dismissed_ids: Vec<String>,
    pub finding_snapshot_hash: String,
    pub strategy_summary: String,
    pub synthesis_stages: BTreeMap<String, StageRecord>,
    pub last_completed_at: Option<String>,
    pub last_run: Option<String>,
    pub version: u32,
    pub trigger: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Plan {
    pub version: u32,
    pub created: String,
    pub updated: String,
    pub queue_order: Vec<String>,
    pub skipped: BTreeMap<String, SkipEntry>,
    pub active_cluster: Option<String>,
    pub overrides: BTreeMap<String, ItemOverride>,
    pub clusters: BTreeMap<String, Cluster>,
    pub superseded: BTreeMap<String, SupersededEntry>,
    pub plan_start_scores: Option<ScoreSnapshot>,
    pub epic_synthesis_meta: SynthesisMeta,
}

impl Default for Plan {
    fn default() -> Self {
        let now = utc_now();
        Self {
            version: PLAN_VERSION,
            created: now.clone(),
            updated: now,
            queue_order: vec![],
            skipped: BTreeMap::new(),
            active_cluster: None,
            overrides: BTreeMap::new(),
            clusters: BTreeMap::new(),
            superseded: BTreeMap::new(),
            plan_start_scores: None,
            epic_synthesis_meta: SynthesisMeta::default(),
        }
    }
}

impl Plan {
    /// True when the plan carries user intent worth surfacing.
    pub fn is_living(&self) -> bool {
        !self.queue_order.is_empty() || !self.overrides.is_empty() || !self.clusters.is_empty()
    }

    pub fn epics(&self) -> impl Iterator<Item = (&String, &Cluster)> {
        self.clusters.iter().filter(|(name, _)| name.starts_with(EPIC_PREFIX))
    }

    pub fn is_synthetic_id(id: &str) -> bool {
        id.starts_with(SUBJECTIVE_PREFIX) || id == SYNTHESIS_ID
    }
}

/// Check plan invariants. Violations indicate a corrupted or hand-edited
/// plan file.
pub fn validate_plan(plan: &Plan) -> Result<(), String> {
    let mut overlap: Vec<&str> = plan
        .queue_order
        .iter()
        .filter(|id| plan.skipped.contains_key(*id))
        .map(String::as_str)
        .collect();
    if !overlap.is_empty() {
        overlap.sort_unstable();
        return Err(format!(
            "IDs cannot appear in both queue_order and skipped: {overlap:?}"
        ));
    }
    for (id, entry) in &plan.skipped {
        if entry.finding_id != *id {
            return Err(format!("skip entry key/id mismatch for {id}"));
        }
    }
    for (id, override_entry) in &plan.overrides {
        if let Some(cluster) = &override_entry.cluster
            && !plan.clusters.contains_key(cluster)
        {
            return Err(format!(
                "override for {id} references missing cluster {cluster:?}"
            ));
        }
    }
    Ok(())
}

// --- Migration & persistence -----------------------------------------------

/// Normalize a raw plan payload: v1 `deferred` list -> temporary skips,
/// v3 top-level `epics` -> `epic/` clusters, container defaults.
fn normalize_raw_plan(raw: &mut Value) -> Vec<String> {
    let mut notes = vec![];
    let now = utc_now();
    let Some(obj) = raw.as_object_mut() else {
        return notes;
    };

    // v1 -> v2: deferred list becomes temporary skips.
    let deferred: Vec<String> = obj
        .remove("deferred")
        .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
        .unwrap_or_default();
    if !deferred.is_empty() {
        let skipped = obj
            .entry("skipped")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(skipped) = skipped.as_object_mut() {
            for fid in &deferred {
                if skipped.contains_key(fid) {
                    continue;
                }
                skipped.insert(
                    fid.clone(),
                    serde_json::json!({
                        "finding_id": fid,
                        "kind": "temporary",
                        "created_at": now,
                        "skipped_at_scan": 0,
                    }),
                );
            }
            notes.push(format!(
                "migrated {} deferred item(s) to temporary skips",
                deferred.len()
            ));
        }
    }

    // v3 -> v4: top-level epics dict becomes epic/ clusters.
    if let Some(epics) = obj.remove("epics").and_then(|v| {
        if let Value::Object(map) = v {
            Some(map)
        } else {
            None
        }
    }) && !epics.is_empty()
    {
        let clusters = obj
            .entry("clusters")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(clusters) = clusters.as_object_mut() {
            let mut migrated = 0usize;
            for (name, epic) in epics {
                let Value::Object(epic) = epic else { continue };
                let cluster_name = if name.starts_with(EPIC_PREFIX) {
                    name.clone()
                } else {
                    format!("{EPIC_PREFIX}{name}")
                };
                if clusters.contains_key(&cluster_name) {
                    continue;
                }
                let thesis = epic
                    .get("thesis")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let mut cluster = serde_json::json!({
                    "name": cluster_name,
                    "description": thesis,
                    "auto": true,
                    "cluster_key": format!("epic::{cluster_name}"),
                    "action": format!("desloppify plan focus {cluster_name}"),
                    "user_modified": false,
                    "created_at": now,
                    "updated_at": now,
                });
                if let Some(target) = cluster.as_object_mut() {
                    for key in [
                        "thesis",
                        "direction",
                        "root_cause",
                        "finding_ids",
                        "dismissed",
                        "agent_safe",
                        "dependency_order",
                        "action_steps",
                        "status",
                        "synthesis_version",
                    ] {
                        if let Some(v) = epic.get(key) {
                            target.insert(key.to_string(), v.clone());
                        }
                    }
                }
                clusters.insert(cluster_name, cluster);
                migrated += 1;
            }
            if migrated > 0 {
                notes.push(format!("migrated {migrated} epic(s) into clusters"));
            }
        }
    }

    // Older files stored plan_start_scores as a possibly-empty dict.
    if let Some(scores) = obj.get("plan_start_scores")
        && scores.as_object().is_some_and(|m| m.is_empty())
    {
        obj.insert("plan_start_scores".to_string(), Value::Null);
    }

    // Backfill skip-entry finding_id from the map key.
    if let Some(skipped) = obj.get_mut("skipped").and_then(Value::as_object_mut) {
        for (fid, entry) in skipped.iter_mut() {
            if let Some(entry) = entry.as_object_mut() {
                entry
                    .entry("finding_id")
                    .or_insert_with(|| Value::String(fid.clone()));
            }
        }
    }

    notes
}

pub fn load_plan(path: &Path) -> Plan {
    if !path.is_file() {
        return Plan::default();
    }
    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Warning: could not read plan {path:?} ({e}). Starting fresh.");
            return Plan::default();
        }
    };
    let mut value: Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Warning: plan file corrupted ({e}). Starting fresh.");
            return Plan::default();
        }
    };
    if !value.is_object() {
        eprintln!("Warning: plan file root must be a JSON object. Starting fresh.");
        return Plan::default();
    }

    let version = value.get("version").and_then(Value::as_u64).unwrap_or(1) as u32;
    if version > PLAN_VERSION {
        eprintln!(
            "Warning: plan file version {version} is newer than supported ({PLAN_VERSION}). \
Some features may not work correctly."
        );
    }
    for note in normalize_raw_plan(&mut value) {
        eprintln!("Warning: {note}.");
    }

    let mut plan: Plan = match serde_json::from_value(value) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Warning: plan file invalid ({e}). Starting fresh.");
            return Plan::default();
        }
    };
    plan.version = PLAN_VERSION;
    if let Err(e) = validate_plan(&plan) {
        eprintln!("Warning: plan invariants invalid ({e}). Starting fresh.");
        return Plan::default();
    }
    plan
}

pub fn plan_to_json(plan: &mut Plan) -> Result<String, PersistenceError> {
    plan.updated = utc_now();
    validate_plan(plan).map_err(|message| PersistenceError::Serialize {
        what: "plan",
        message,
    })?;
    serde_json::to_string_pretty(&*plan)
        .map(|s| s + "\n")
        .map_err(|e| PersistenceError::Serialize {
            what: "plan",
            message: e.to_string(),
        })
}

pub fn save_plan(plan: &mut Plan, path: &Path) -> Result<(), PersistenceError> {
    let json = plan_to_json(plan)?;
    journal::atomic_write(path, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_plan_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.json");
        let mut plan = Plan::default();
        plan.queue_order.push("unused::a.py::os".to_string());
        save_plan(&mut plan, &path).unwrap();
        let loaded = load_plan(&path);
        assert_eq!(loaded.version, PLAN_VERSION);
        assert_eq!(loaded.queue_order, vec!["unused::a.py::os"]);
    }

    #[test]
    fn v1_deferred_migrates_to_temporary_skips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(
            &path,
            r#"{"version": 1, "deferred": ["unused::a.py::os"], "queue_order": []}"#,
        )
        .unwrap();
        let plan = load_plan(&path);
        let entry = &plan.skipped["unused::a.py::os"];
        assert_eq!(entry.kind, SkipKind::Temporary);
        assert_eq!(entry.finding_id, "unused::a.py::os");
    }

    #[test]
    fn v3_epics_migrate_into_clusters() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(
            &path,
            r#"{
  "version": 3,
  "queue_order": [],
  "epics": {
    "collapse-layers": {
      "thesis": "Collapse the pass-through service layer",
      "direction": "flatten",
      "finding_ids": ["review::.::abc12345"],
      "dependency_order": 1
    }
  }
}"#,
        )
        .unwrap();
        let plan = load_plan(&path);
        let cluster = &plan.clusters["epic/collapse-layers"];
        assert!(cluster.auto);
        assert_eq!(cluster.thesis, "Collapse the pass-through service layer");
        assert_eq!(cluster.dependency_order, 1);
        assert_eq!(cluster.finding_ids, vec!["review::.::abc12345"]);
    }

    #[test]
    fn queue_skip_overlap_fails_validation() {
        let mut plan = Plan::default();
        plan.queue_order.push("x::y::z".to_string());
        plan.skipped.insert(
            "x::y::z".to_string(),
            SkipEntry {
                finding_id: "x::y::z".to_string(),
                kind: SkipKind::Temporary,
                reason: None,
                note: None,
                attestation: None,
                created_at: utc_now(),
                review_after: None,
                skipped_at_scan: 0,
            },
        );
        assert!(validate_plan(&plan).is_err());
        let dir = tempdir().unwrap();
        assert!(save_plan(&mut plan, &dir.path().join("plan.json")).is_err());
    }

    #[test]
    fn dangling_override_cluster_fails_validation() {
        let mut plan = Plan::default();
        plan.overrides.insert(
            "x::y::z".to_string(),
            ItemOverride {
                finding_id: "x::y::z".to_string(),
                cluster: Some("ghost".to_string()),
                ..ItemOverride::default()
            },
        );
        assert!(validate_plan(&plan).is_err());
    }

    #[test]
    fn corrupt_plan_starts_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(&path, "12").unwrap();
        let plan = load_plan(&path);
        assert!(plan.queue_order.is_empty());
    }

    #[test]
    fn synthetic_id_detection() {
        assert!(Plan::is_synthetic_id("subjective::naming_quality"));
        assert!(Plan::is_synthetic_id(SYNTHESIS_ID));
        assert!(!Plan::is_synthetic_id("unused::a.py::os"));
    }
}
