//! Finding store: canonical `finding_id -> Finding` map with status
//! lifecycle, reopen tracking, suppression, and the attestation log.

use crate::errors::PersistenceError;
use crate::journal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

mod matching;
mod merge;
mod suppress;

pub use matching::{StatusFilter, apply_finding_noise_budget, match_findings, resolve_findings};
pub use merge::{MergeSummary, merge_scan_results};
pub use suppress::sync_suppressions;

pub const STATE_VERSION: u32 = 2;

pub fn utc_now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Open,
    Fixed,
    Wontfix,
    FalsePositive,
    AutoResolved,
}

impl Status {
    pub fn token(self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::Fixed => "fixed",
            Status::Wontfix => "wontfix",
            Status::FalsePositive => "false_positive",
            Status::AutoResolved => "auto_resolved",
        }
    }

    /// Parse a wire token. `resolved` is a legacy alias for `fixed`.
    pub fn parse(token: &str) -> Option<Status> {
        match token.trim().to_lowercase().as_str() {
            "open" => Some(Status::Open),
            "fixed" | "resolved" => Some(Status::Fixed),
            "wontfix" => Some(Status::Wontfix),
            "false_positive" => Some(Status::FalsePositive),
            "auto_resolved" => Some(Status::AutoResolved),
            _ => None,
        }
    }

    pub fn is_resolved(self) -> bool {
        !matches!(self, Status::Open)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn parse(token: &str) -> Option<Confidence> {
        match token.trim().to_lowercase().as_str() {
            "high" => Some(Confidence::High),
            "medium" => Some(Confidence::Medium),
            "low" => Some(Confidence::Low),
            _ => None,
        }
    }

    /// Rank for queue ordering (lower sorts first).
    pub fn rank(self) -> u8 {
        match self {
            Confidence::High => 0,
            Confidence::Medium => 1,
            Confidence::Low => 2,
        }
    }

    /// Issue weight used by the score engine.
    pub fn weight(self) -> f64 {
        match self {
            Confidence::High => 1.0,
            Confidence::Medium => 0.7,
            Confidence::Low => 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Finding {
    pub id: String,
    pub detector: String,
    pub file: String,
    pub tier: u8,
    pub confidence: Confidence,
    pub status: Status,
    pub summary: String,
    #[serde(default)]
    pub detail: Map<String, Value>,
    #[serde(default)]
    pub reopen_count: u32,
    #[serde(default)]
    pub suppressed: bool,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub resolution_attestation: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<String>,
    /// True once a rescan has confirmed the resolution (or the resolution
    /// was produced by the scanner itself).
    #[serde(default)]
    pub scan_verified: bool,
}

impl Finding {
    pub fn is_chronic(&self) -> bool {
        self.status == Status::Open && self.reopen_count >= 2
    }

    pub fn dimension_key(&self) -> Option<String> {
        self.detail
            .get("dimension")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn is_holistic(&self) -> bool {
        self.detail
            .get("holistic")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Pure constructor producing the canonical id
/// `<detector>::<relative-file>::<subtype-or-hash>`.
pub fn make_finding(
    detector: &str,
    file: &str,
    name: &str,
    tier: u8,
    confidence: Confidence,
    summary: impl Into<String>,
    detail: Map<String, Value>,
) -> Finding {
    let file = file.replace('\\', "/");
    Finding {
        id: format!("{detector}::{file}::{name}"),
        detector: detector.to_string(),
        file,
        tier: tier.clamp(1, 4),
        confidence,
        status: Status::Open,
        summary: summary.into(),
        detail,
        reopen_count: 0,
        suppressed: false,
        note: None,
        resolution_attestation: None,
        resolved_at: None,
        scan_verified: false,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Stats {
    pub open: usize,
    pub fixed: usize,
    pub wontfix: usize,
    pub false_positive: usize,
    pub auto_resolved: usize,
    pub suppressed: usize,
    /// Open findings per tier.
    pub by_tier: BTreeMap<u8, usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SubjectiveAssessment {
    pub score: f64,
    pub placeholder: bool,
    pub needs_review_refresh: bool,
    pub stale_since: Option<String>,
    pub reviewed_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DimensionScore {
    pub score: f64,
    pub strict: f64,
    pub issues: usize,
    pub checks: usize,
    pub tier: u8,
    /// Finding count per contributing detector.
    pub detectors: BTreeMap<String, usize>,
    pub subjective: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AttestationEntry {
    pub timestamp: String,
    pub command: String,
    pub pattern: String,
    pub attestation: Option<String>,
    pub affected: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct State {
    pub version: u32,
    pub findings: BTreeMap<String, Finding>,
    pub stats: Stats,
    pub scan_count: u32,
    pub last_scan: Option<String>,
    pub scan_path: Option<String>,
    pub subjective_assessments: BTreeMap<String, SubjectiveAssessment>,
    pub dimension_scores: BTreeMap<String, DimensionScore>,
    pub tool_hash: Option<String>,
    pub attestation_log: Vec<AttestationEntry>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            findings: BTreeMap::new(),
            stats: Stats::default(),
            scan_count: 0,
            last_scan: None,
            scan_path: None,
            subjective_assessments: BTreeMap::new(),
            dimension_scores: BTreeMap::new(),
            tool_hash: None,
            attestation_log: vec![],
        }
    }
}

/// Rebuild `stats` as a pure projection of `findings`.
pub fn rebuild_stats(state: &mut State) {
    let mut stats = Stats::default();
    for finding in state.findings.values() {
        match finding.status {
            Status::Open => stats.open += 1,
            Status::Fixed => stats.fixed += 1,
            Status::Wontfix => stats.wontfix += 1,
            Status::FalsePositive => stats.false_positive += 1,
            Status::AutoResolved => stats.auto_resolved += 1,
        }
        if finding.suppressed {
            stats.suppressed += 1;
        }
        if finding.status == Status::Open {
            *stats.by_tier.entry(finding.tier.clamp(1, 4)).or_insert(0) += 1;
        }
    }
    state.stats = stats;
}

/// Restrict findings to the subtree rooted at `scan_path` (repo-relative).
pub fn path_scoped_findings<'a>(
    findings: &'a BTreeMap<String, Finding>,
    scan_path: Option<&str>,
) -> BTreeMap<&'a str, &'a Finding> {
    let prefix = scan_path
        .map(|p| p.trim_end_matches('/'))
        .filter(|p| !p.is_empty() && *p != ".");
    findings
        .iter()
        .filter(|(_, f)| match prefix {
            None => true,
            Some(prefix) => f.file == prefix || f.file.starts_with(&format!("{prefix}/")),
        })
        .map(|(id, f)| (id.as_str(), f))
        .collect()
}

// --- Normalization & persistence -------------------------------------------

/// Canonicalize legacy/unknown tokens in a raw state payload before typed
/// deserialization. Returns migration notes for stderr.
fn normalize_raw_state(raw: &mut Value) -> Vec<String> {
    let mut notes = vec![];
    let Some(obj) = raw.as_object_mut() else {
        return notes;
    };
    let Some(findings) = obj.get_mut("findings").and_then(Value::as_object_mut) else {
        return notes;
    };

    let mut legacy_status = 0usize;
    let mut unknown_status = 0usize;
    let mut unknown_confidence = 0usize;
    for finding in findings.values_mut() {
        let Some(f) = finding.as_object_mut() else {
            continue;
        };
        let status_token = f.get("status").and_then(Value::as_str).unwrap_or("open");
        let canonical = match Status::parse(status_token) {
            Some(status) => {
                if status_token.eq_ignore_ascii_case("resolved") {
                    legacy_status += 1;
                }
                status
            }
            None => {
                unknown_status += 1;
                Status::Open
            }
        };
        f.insert(
            "status".to_string(),
            Value::String(canonical.token().to_string()),
        );

        let confidence_token = f
            .get("confidence")
            .and_then(Value::as_str)
            .unwrap_or("low")
            .to_string();
        if Confidence::parse(&confidence_token).is_none() {
            unknown_confidence += 1;
            f.insert("confidence".to_string(), Value::String("low".to_string()));
        } else {
            f.insert(
                "confidence".to_string(),
                Value::String(confidence_token.to_lowercase()),
            );
        }

        let tier = f.get("tier").and_then(Value::as_u64).unwrap_or(3);
        f.insert("tier".to_string(), Value::from(tier.clamp(1, 4)));
    }

    if legacy_status > 0 {
        notes.push(format!(
            "migrated {legacy_status} legacy 'resolved' status value(s) to 'fixed'"
        ));
    }
    if unknown_status > 0 {
        notes.push(format!(
            "coerced {unknown_status} unknown finding status value(s) to 'open'"
        ));
    }
    if unknown_confidence > 0 {
        notes.push(format!(
            "coerced {unknown_confidence} unknown confidence value(s) to 'low'"
        ));
    }
    notes
}

/// Load state from disk. Corruption warns and returns an empty state; a
/// newer-than-supported schema version warns but continues.
pub fn load_state(path: &Path) -> State {
    if !path.is_file() {
        return State::default();
    }
    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Warning: could not read state {path:?} ({e}). Starting fresh.");
            return State::default();
        }
    };
    let mut value: Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Warning: state file corrupted ({e}). Starting fresh.");
            return State::default();
        }
    };
    if !value.is_object() {
        eprintln!("Warning: state file root must be a JSON object. Starting fresh.");
        return State::default();
    }

    let version = value.get("version").and_then(Value::as_u64).unwrap_or(1) as u32;
    if version > STATE_VERSION {
        eprintln!(
            "Warning: state file version {version} is newer than supported ({STATE_VERSION}). \
Some features may not work correctly."
        );
    }
    for note in normalize_raw_state(&mut value) {
        eprintln!("Warning: {note}.");
    }

    let mut state: State = match serde_json::from_value(value) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Warning: state file invalid ({e}). Starting fresh.");
            return State::default();
        }
    };
    state.version = STATE_VERSION;
    rebuild_stats(&mut state);
    state
}

pub fn state_to_json(state: &mut State) -> Result<String, PersistenceError> {
    rebuild_stats(state);
    serde_json::to_string_pretty(&*state)
        .map(|s| s + "\n")
        .map_err(|e| PersistenceError::Serialize {
            what: "state",
            message: e.to_string(),
        })
}

pub fn save_state(state: &mut State, path: &Path) -> Result<(), PersistenceError> {
    let json = state_to_json(state)?;
    journal::atomic_write(path, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn finding(detector: &str, file: &str, name: &str) -> Finding {
        make_finding(
            detector,
            file,
            name,
            1,
            Confidence::High,
            format!("{name} in {file}"),
            Map::new(),
        )
    }

    #[test]
    fn make_finding_builds_canonical_id() {
        let f = finding("unused", "src/a.py", "os");
        assert_eq!(f.id, "unused::src/a.py::os");
        assert_eq!(f.status, Status::Open);
    }

    #[test]
    fn make_finding_normalizes_backslashes_and_tier() {
        let f = make_finding(
            "smells",
            "src\\win\\mod.py",
            "silent_except",
            9,
            Confidence::Low,
            "x",
            Map::new(),
        );
        assert_eq!(f.file, "src/win/mod.py");
        assert_eq!(f.tier, 4);
    }

    #[test]
    fn stats_are_pure_projection() {
        let mut state = State::default();
        let mut a = finding("unused", "a.py", "os");
        a.status = Status::Fixed;
        let b = finding("unused", "b.py", "sys");
        let mut c = finding("smells", "c.py", "silent_except");
        c.tier = 2;
        c.suppressed = true;
        for f in [a, b, c] {
            state.findings.insert(f.id.clone(), f);
        }
        rebuild_stats(&mut state);
        assert_eq!(state.stats.open, 2);
        assert_eq!(state.stats.fixed, 1);
        assert_eq!(state.stats.suppressed, 1);
        assert_eq!(state.stats.by_tier.get(&1), Some(&1));
        assert_eq!(state.stats.by_tier.get(&2), Some(&1));
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state-python.json");
        let mut state = State::default();
        let f = finding("unused", "src/a.py", "os");
        state.findings.insert(f.id.clone(), f);
        state.scan_count = 3;
        save_state(&mut state, &path).unwrap();

        let loaded = load_state(&path);
        assert_eq!(loaded.scan_count, 3);
        assert_eq!(loaded.findings.len(), 1);
        assert_eq!(loaded.stats.open, 1);
    }

    #[test]
    fn load_migrates_legacy_resolved_status() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{
  "version": 1,
  "findings": {
    "unused::a.py::os": {
      "id": "unused::a.py::os",
      "detector": "unused",
      "file": "a.py",
      "tier": 1,
      "confidence": "high",
      "status": "resolved",
      "summary": "unused import"
    }
  }
}"#,
        )
        .unwrap();
        let state = load_state(&path);
        assert_eq!(
            state.findings["unused::a.py::os"].status,
            Status::Fixed
        );
        assert_eq!(state.version, STATE_VERSION);
    }

    #[test]
    fn load_corrupt_returns_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let state = load_state(&path);
        assert!(state.findings.is_empty());
    }

    #[test]
    fn path_scoping_restricts_to_subtree() {
        let mut findings = BTreeMap::new();
        for f in [
            finding("unused", "src/app/a.py", "os"),
            finding("unused", "src/apps/b.py", "os"),
            finding("unused", "lib/c.py", "os"),
        ] {
            findings.insert(f.id.clone(), f);
        }
        let scoped = path_scoped_findings(&findings, Some("src/app"));
        assert_eq!(scoped.len(), 1);
        assert!(scoped.contains_key("unused::src/app/a.py::os"));
        assert_eq!(path_scoped_findings(&findings, None).len(), 3);
    }
}
