//! Canonical structured output: every command emits one payload, printed to
//! stdout and mirrored atomically to `.desloppify/query.json` for external
//! agents.

use crate::config::ProjectConfig;
use crate::journal;
use crate::scoring::ScoreSnapshot;
use schemars::{JsonSchema, schema_for};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::path::Path;

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct QueryPayload {
    pub command: String,
    /// Narrative text is supplied by an external collaborator; the core only
    /// reserves the slot.
    pub narrative: Value,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl QueryPayload {
    pub fn new(command: &str) -> QueryPayload {
        QueryPayload {
            command: command.to_string(),
            narrative: Value::Object(Map::new()),
            fields: Map::new(),
        }
    }

    pub fn set(mut self, key: &str, value: impl Serialize) -> QueryPayload {
        self.fields.insert(
            key.to_string(),
            serde_json::to_value(value).unwrap_or(Value::Null),
        );
        self
    }

    pub fn with_scores(self, scores: ScoreSnapshot) -> QueryPayload {
        self.set("overall_score", scores.overall)
            .set("objective_score", scores.objective)
            .set("strict_score", scores.strict)
            .set("verified_strict_score", scores.verified)
    }

    pub fn with_prev_scores(self, scores: ScoreSnapshot) -> QueryPayload {
        self.set("prev_overall_score", scores.overall)
            .set("prev_objective_score", scores.objective)
            .set("prev_strict_score", scores.strict)
            .set("prev_verified_strict_score", scores.verified)
    }
}

/// Write the payload to `query.json`, injecting a config snapshot when the
/// command did not provide one. Write failures are recorded in the payload
/// and surfaced on stderr, never fatal.
pub fn write_query(payload: &mut QueryPayload, config: &ProjectConfig, query_path: &Path) {
    if !payload.fields.contains_key("config") {
        payload
            .fields
            .insert("config".to_string(), config.for_query());
    }
    let json = match serde_json::to_string_pretty(payload) {
        Ok(s) => s + "\n",
        Err(e) => {
            eprintln!("Warning: could not serialize query payload: {e}");
            return;
        }
    };
    if let Err(e) = journal::atomic_write(query_path, &json) {
        payload
            .fields
            .insert("query_write_error".to_string(), json!(e.to_string()));
        eprintln!("Warning: could not write query.json: {e}");
    } else {
        eprintln!("  -> query.json updated");
    }
}

/// JSON Schemas for the payload and its load-bearing sub-shapes, for
/// external agents that consume `query.json`.
pub fn query_schema() -> Value {
    json!({
        "payload": schema_for!(QueryPayload),
        "scores": schema_for!(ScoreSnapshot),
        "work_queue": schema_for!(crate::work_queue::WorkQueue),
        "queue_item": schema_for!(crate::work_queue::QueueItem),
        "synthesis_status": schema_for!(crate::plan::SynthesisStatus),
        "config": schema_for!(ProjectConfig),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn payload_includes_scores_and_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("query.json");
        let mut payload = QueryPayload::new("scan")
            .with_scores(ScoreSnapshot::perfect())
            .set("new_findings", 3);
        write_query(&mut payload, &ProjectConfig::default(), &path);

        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["command"], "scan");
        assert_eq!(raw["overall_score"], 100.0);
        assert_eq!(raw["new_findings"], 3);
        assert_eq!(raw["config"]["target_strict_score"], 95);
        assert!(raw["narrative"].is_object());
    }

    #[test]
    fn write_failure_is_recorded_not_fatal() {
        let dir = tempdir().unwrap();
        // A directory at the target path makes the rename fail.
        let path = dir.path().join("query.json");
        std::fs::create_dir_all(&path).unwrap();
        let mut payload = QueryPayload::new("scan");
        write_query(&mut payload, &ProjectConfig::default(), &path);
        assert!(payload.fields.contains_key("query_write_error"));
    }

    #[test]
    fn schema_covers_payload_shapes() {
        let schema = query_schema();
        assert!(schema["payload"].is_object());
        assert!(schema["queue_item"].is_object());
    }
}
