//! Detector registry. Detectors are registered in an explicit table; an
//! unknown detector name is a validation error, never a silent no-op.

use crate::errors::CommandError;
use crate::hash::short_hash;
use crate::paths::{SourceFile, Zone};
use crate::state::Confidence;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

mod security;
mod smells;
mod structural;
mod unused;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    AutoFix,
    ManualFix,
    Refactor,
    Reorganize,
    Review,
}

#[derive(Debug, Clone)]
pub struct DetectorMeta {
    pub name: &'static str,
    pub display: &'static str,
    /// Scorecard dimension this detector feeds. Empty for ingest-only
    /// detectors whose findings carry their own dimension in `detail`.
    pub dimension: &'static str,
    pub default_tier: u8,
    pub action_type: ActionType,
    pub needs_judgment: bool,
    pub fixers: &'static [&'static str],
    pub guidance: Option<&'static str>,
    pub tool: Option<&'static str>,
    pub zones: &'static [Zone],
}

/// One raw detector signal; the finding store appends the canonical id.
#[derive(Debug, Clone)]
pub struct DetectorEntry {
    pub file: String,
    pub name: String,
    pub tier: u8,
    pub confidence: Confidence,
    pub summary: String,
    pub detail: Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct DetectorOptions {
    pub large_files_threshold: usize,
}

/// A file handed to detectors: repo-relative path, zone, and content.
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub rel: String,
    pub zone: Zone,
    pub text: String,
}

pub type DetectorFn = fn(&[LoadedFile], &DetectorOptions) -> (Vec<DetectorEntry>, usize);

pub fn registry() -> &'static BTreeMap<&'static str, DetectorMeta> {
    static REGISTRY: OnceLock<BTreeMap<&'static str, DetectorMeta>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let metas = [
            DetectorMeta {
                name: "unused",
                display: "unused imports",
                dimension: "Dead code",
                default_tier: 1,
                action_type: ActionType::AutoFix,
                needs_judgment: false,
                fixers: &["unused-imports"],
                guidance: None,
                tool: None,
                zones: &[Zone::Production],
            },
            DetectorMeta {
                name: "smells",
                display: "code smells",
                dimension: "Code smells",
                default_tier: 2,
                action_type: ActionType::ManualFix,
                needs_judgment: true,
                fixers: &[],
                guidance: Some(
                    "fix code smells — silent exception handlers, leftover debug prints",
                ),
                tool: None,
                zones: &[Zone::Production, Zone::Script],
            },
            DetectorMeta {
                name: "security",
                display: "security risks",
                dimension: "Security",
                default_tier: 2,
                action_type: ActionType::ManualFix,
                needs_judgment: true,
                fixers: &[],
                guidance: Some("remove the dangerous pattern or isolate it behind validation"),
                tool: None,
                zones: &[Zone::Production, Zone::Script],
            },
            DetectorMeta {
                name: "structural",
                display: "structural issues",
                dimension: "Structural health",
                default_tier: 3,
                action_type: ActionType::Reorganize,
                needs_judgment: true,
                fixers: &[],
                guidance: None,
                tool: Some("move"),
                zones: &[Zone::Production],
            },
            DetectorMeta {
                name: "review",
                display: "review findings",
                dimension: "",
                default_tier: 1,
                action_type: ActionType::Review,
                needs_judgment: true,
                fixers: &[],
                guidance: None,
                tool: Some("review"),
                zones: &[],
            },
            DetectorMeta {
                name: "concerns",
                display: "holistic concerns",
                dimension: "",
                default_tier: 3,
                action_type: ActionType::Review,
                needs_judgment: true,
                fixers: &[],
                guidance: None,
                tool: Some("review"),
                zones: &[],
            },
            DetectorMeta {
                name: "subjective_assessment",
                display: "subjective dimensions",
                dimension: "",
                default_tier: 4,
                action_type: ActionType::Review,
                needs_judgment: true,
                fixers: &[],
                guidance: None,
                tool: Some("review"),
                zones: &[],
            },
        ];
        metas.into_iter().map(|m| (m.name, m)).collect()
    })
}

/// Scan functions for detectors that actually probe files. Ingest-only
/// detectors (`review`, `concerns`, `subjective_assessment`) have none.
pub fn scan_registry() -> &'static BTreeMap<&'static str, DetectorFn> {
    static SCANNERS: OnceLock<BTreeMap<&'static str, DetectorFn>> = OnceLock::new();
    SCANNERS.get_or_init(|| {
        let mut map: BTreeMap<&'static str, DetectorFn> = BTreeMap::new();
        map.insert("unused", unused::detect as DetectorFn);
        map.insert("smells", smells::detect as DetectorFn);
        map.insert("security", security::detect as DetectorFn);
        map.insert("structural", structural::detect as DetectorFn);
        map
    })
}

pub fn meta(name: &str) -> Result<&'static DetectorMeta, CommandError> {
    registry()
        .get(name)
        .ok_or_else(|| CommandError::validation(format!("Unknown detector: {name}")))
}

pub fn lookup(name: &str) -> Option<&'static DetectorMeta> {
    registry().get(name)
}

/// Files a detector is allowed to see, per its zone policy.
pub fn files_in_zones<'a>(files: &'a [LoadedFile], zones: &[Zone]) -> Vec<&'a LoadedFile> {
    files.iter().filter(|f| zones.contains(&f.zone)).collect()
}

/// Content hash over the detector bank source, first 12 hex chars. A
/// mismatch against the stored state hash means findings predate the current
/// detector behavior.
pub fn tool_hash() -> String {
    static SOURCES: &[&str] = &[
        include_str!("detectors.rs"),
        include_str!("detectors/unused.rs"),
        include_str!("detectors/smells.rs"),
        include_str!("detectors/security.rs"),
        include_str!("detectors/structural.rs"),
    ];
    let joined = SOURCES.concat();
    short_hash(joined.as_bytes(), 12)
}
