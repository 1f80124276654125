//! Project configuration (`.desloppify/config.json`) with an enumerated key
//! set. Unknown keys are rejected on `set`, tolerated (and dropped) on load.

use crate::errors::{CommandError, PersistenceError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

pub const MIN_TARGET_STRICT_SCORE: i64 = 0;
pub const MAX_TARGET_STRICT_SCORE: i64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IgnoreMeta {
    pub note: String,
    pub added_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ProjectConfig {
    /// North-star strict score target used to prioritize guidance.
    pub target_strict_score: i64,
    /// Days before a file review is considered stale (0 = never).
    pub review_max_age_days: i64,
    /// Max files assigned to each holistic review batch (0 = unlimited).
    pub review_batch_max_files: i64,
    /// Days before a holistic review is considered stale (0 = never).
    pub holistic_max_age_days: i64,
    /// Generate scorecard image after each scan.
    pub generate_scorecard: bool,
    /// Output path for the scorecard image.
    pub badge_path: String,
    /// Path patterns to exclude from scanning.
    pub exclude: Vec<String>,
    /// Finding patterns to suppress.
    pub ignore: Vec<String>,
    /// Per-ignore-pattern note + timestamp.
    pub ignore_metadata: BTreeMap<String, IgnoreMeta>,
    /// Manual zone overrides (relative path or directory -> zone name).
    pub zone_overrides: BTreeMap<String, String>,
    /// Override default subjective review dimensions (empty = built-in).
    pub review_dimensions: Vec<String>,
    /// Override LOC threshold for large-file detection (0 = detector default).
    pub large_files_threshold: i64,
    /// Override prop-count threshold for bloated interfaces (0 = default).
    pub props_threshold: i64,
    /// Max findings surfaced per detector in summaries (0 = unlimited).
    pub finding_noise_budget: i64,
    /// Global cap applied after the per-detector budget (0 = unlimited).
    pub finding_noise_global_budget: i64,
    /// Set when config changes may have invalidated cached scores.
    pub needs_rescan: bool,
    /// Language-specific settings.
    pub languages: BTreeMap<String, Value>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            target_strict_score: 95,
            review_max_age_days: 30,
            review_batch_max_files: 80,
            holistic_max_age_days: 30,
            generate_scorecard: true,
            badge_path: "scorecard.png".to_string(),
            exclude: vec![],
            ignore: vec![],
            ignore_metadata: BTreeMap::new(),
            zone_overrides: BTreeMap::new(),
            review_dimensions: vec![],
            large_files_threshold: 0,
            props_threshold: 0,
            finding_noise_budget: 10,
            finding_noise_global_budget: 0,
            needs_rescan: false,
            languages: BTreeMap::new(),
        }
    }
}

pub const CONFIG_KEYS: &[&str] = &[
    "target_strict_score",
    "review_max_age_days",
    "review_batch_max_files",
    "holistic_max_age_days",
    "generate_scorecard",
    "badge_path",
    "exclude",
    "ignore",
    "ignore_metadata",
    "zone_overrides",
    "review_dimensions",
    "large_files_threshold",
    "props_threshold",
    "finding_noise_budget",
    "finding_noise_global_budget",
    "needs_rescan",
    "languages",
];

pub fn load_config(path: &Path) -> ProjectConfig {
    if !path.is_file() {
        return ProjectConfig::default();
    }
    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Warning: could not read config {path:?} ({e}); using defaults.");
            return ProjectConfig::default();
        }
    };
    match serde_json::from_str::<ProjectConfig>(&raw) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: config file corrupted ({e}); using defaults.");
            ProjectConfig::default()
        }
    }
}

pub fn save_config(config: &ProjectConfig, path: &Path) -> Result<(), PersistenceError> {
    let json = serde_json::to_string_pretty(config).map_err(|e| PersistenceError::Serialize {
        what: "config",
        message: e.to_string(),
    })?;
    crate::journal::atomic_write(path, &(json + "\n"))
}

fn parse_int(key: &str, raw: &str) -> Result<i64, CommandError> {
    if raw.eq_ignore_ascii_case("never") {
        return Ok(0);
    }
    raw.parse::<i64>()
        .map_err(|_| CommandError::validation(format!("Expected integer for {key}, got: {raw}")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, CommandError> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(CommandError::validation(format!(
            "Expected true/false for {key}, got: {raw}"
        ))),
    }
}

fn validate_badge_path(raw: &str) -> Result<String, CommandError> {
    let value = raw.trim();
    let name = Path::new(value)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    if value.is_empty() || value.ends_with('/') || value.ends_with('\\') || name.is_empty() {
        return Err(CommandError::validation(format!(
            "Expected file path for badge_path (example: scorecard.png or assets/scorecard.png), got: {raw}"
        )));
    }
    Ok(value.to_string())
}

fn push_unique(list: &mut Vec<String>, raw: &str) {
    if !list.iter().any(|v| v == raw) {
        list.push(raw.to_string());
    }
}

impl ProjectConfig {
    /// Parse and set a config value from a raw CLI string. `never` maps to 0
    /// for age keys; list keys append with dedup; dict keys are not settable.
    pub fn set_value(&mut self, key: &str, raw: &str) -> Result<(), CommandError> {
        match key {
            "target_strict_score" => {
                let parsed = parse_int(key, raw)?;
                if !(MIN_TARGET_STRICT_SCORE..=MAX_TARGET_STRICT_SCORE).contains(&parsed) {
                    return Err(CommandError::validation(format!(
                        "Expected integer {MIN_TARGET_STRICT_SCORE}-{MAX_TARGET_STRICT_SCORE} for {key}, got: {raw}"
                    )));
                }
                self.target_strict_score = parsed;
            }
            "review_max_age_days" => self.review_max_age_days = parse_int(key, raw)?,
            "review_batch_max_files" => self.review_batch_max_files = parse_int(key, raw)?,
            "holistic_max_age_days" => self.holistic_max_age_days = parse_int(key, raw)?,
            "large_files_threshold" => self.large_files_threshold = parse_int(key, raw)?,
            "props_threshold" => self.props_threshold = parse_int(key, raw)?,
            "finding_noise_budget" => self.finding_noise_budget = parse_int(key, raw)?,
            "finding_noise_global_budget" => {
                self.finding_noise_global_budget = parse_int(key, raw)?
            }
            "generate_scorecard" => self.generate_scorecard = parse_bool(key, raw)?,
            "needs_rescan" => self.needs_rescan = parse_bool(key, raw)?,
            "badge_path" => self.badge_path = validate_badge_path(raw)?,
            "exclude" => push_unique(&mut self.exclude, raw),
            "ignore" => push_unique(&mut self.ignore, raw),
            "review_dimensions" => push_unique(&mut self.review_dimensions, raw),
            "ignore_metadata" | "zone_overrides" | "languages" => {
                return Err(CommandError::validation(format!(
                    "Cannot set dict key '{key}' via config set; use the dedicated subcommand"
                )));
            }
            _ => {
                return Err(CommandError::validation(format!(
                    "Unknown config key: {key}"
                )));
            }
        }
        Ok(())
    }

    /// Reset a key to its default value.
    pub fn unset_value(&mut self, key: &str) -> Result<(), CommandError> {
        if !CONFIG_KEYS.contains(&key) {
            return Err(CommandError::validation(format!(
                "Unknown config key: {key}"
            )));
        }
        let defaults = serde_json::to_value(ProjectConfig::default()).unwrap_or_default();
        let mut as_value = serde_json::to_value(&*self).unwrap_or_default();
        if let (Value::Object(target), Value::Object(source)) = (&mut as_value, defaults)
            && let Some(v) = source.get(key)
        {
            target.insert(key.to_string(), v.clone());
        }
        if let Ok(updated) = serde_json::from_value::<ProjectConfig>(as_value) {
            *self = updated;
        }
        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Result<Value, CommandError> {
        if !CONFIG_KEYS.contains(&key) {
            return Err(CommandError::validation(format!(
                "Unknown config key: {key}"
            )));
        }
        let as_value = serde_json::to_value(self).unwrap_or_default();
        Ok(as_value.get(key).cloned().unwrap_or(Value::Null))
    }

    pub fn add_ignore_pattern(&mut self, pattern: &str, note: Option<&str>, added_at: &str) {
        push_unique(&mut self.ignore, pattern);
        if let Some(note) = note {
            self.ignore_metadata.insert(
                pattern.to_string(),
                IgnoreMeta {
                    note: note.to_string(),
                    added_at: added_at.to_string(),
                },
            );
        }
    }

    /// Sanitized snapshot embedded in every query payload.
    pub fn for_query(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = ProjectConfig::default();
        save_config(&config, &path).unwrap();
        let loaded = load_config(&path);
        assert_eq!(loaded.target_strict_score, 95);
        assert_eq!(loaded.finding_noise_budget, 10);
        assert_eq!(loaded.badge_path, "scorecard.png");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let loaded = load_config(&dir.path().join("nope.json"));
        assert_eq!(loaded.target_strict_score, 95);
    }

    #[test]
    fn set_never_maps_to_zero() {
        let mut config = ProjectConfig::default();
        config.set_value("review_max_age_days", "never").unwrap();
        assert_eq!(config.review_max_age_days, 0);
    }

    #[test]
    fn set_rejects_unknown_key() {
        let mut config = ProjectConfig::default();
        let err = config.set_value("nonsense", "1").unwrap_err();
        assert!(err.to_string().contains("Unknown config key"));
    }

    #[test]
    fn set_rejects_out_of_range_target() {
        let mut config = ProjectConfig::default();
        assert!(config.set_value("target_strict_score", "101").is_err());
        assert!(config.set_value("target_strict_score", "80").is_ok());
    }

    #[test]
    fn list_keys_append_with_dedup() {
        let mut config = ProjectConfig::default();
        config.set_value("exclude", "build/**").unwrap();
        config.set_value("exclude", "build/**").unwrap();
        assert_eq!(config.exclude, vec!["build/**".to_string()]);
    }

    #[test]
    fn dict_keys_not_cli_settable() {
        let mut config = ProjectConfig::default();
        assert!(config.set_value("zone_overrides", "x").is_err());
    }

    #[test]
    fn unset_restores_default() {
        let mut config = ProjectConfig::default();
        config.set_value("target_strict_score", "50").unwrap();
        config.unset_value("target_strict_score").unwrap();
        assert_eq!(config.target_strict_score, 95);
    }
}
