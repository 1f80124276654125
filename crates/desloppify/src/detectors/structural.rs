//! Structural probe: files that have outgrown a single responsibility.

use crate::detectors::{DetectorEntry, DetectorOptions, LoadedFile, files_in_zones, registry};
use crate::state::Confidence;
use serde_json::{Map, Value, json};

const DEFAULT_LARGE_FILE_LINES: usize = 400;

pub fn detect(files: &[LoadedFile], options: &DetectorOptions) -> (Vec<DetectorEntry>, usize) {
    let meta = &registry()["structural"];
    let threshold = if options.large_files_threshold > 0 {
        options.large_files_threshold
    } else {
        DEFAULT_LARGE_FILE_LINES
    };
    let candidates = files_in_zones(files, meta.zones);
    let mut entries = vec![];

    for file in &candidates {
        let loc = file.text.lines().count();
        if loc <= threshold {
            continue;
        }
        let mut detail = Map::new();
        detail.insert("kind".to_string(), Value::String("oversized".into()));
        detail.insert("loc".to_string(), json!(loc));
        detail.insert("threshold".to_string(), json!(threshold));
        entries.push(DetectorEntry {
            file: file.rel.clone(),
            name: "oversized".to_string(),
            tier: meta.default_tier,
            confidence: Confidence::Medium,
            summary: format!("File has {loc} lines (threshold {threshold}); split it"),
            detail,
        });
    }

    (entries, candidates.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::Zone;

    fn file_with_lines(rel: &str, n: usize) -> LoadedFile {
        LoadedFile {
            rel: rel.to_string(),
            zone: Zone::Production,
            text: "x = 1\n".repeat(n),
        }
    }

    #[test]
    fn flags_only_files_over_threshold() {
        let files = vec![file_with_lines("src/big.py", 50), file_with_lines("src/ok.py", 10)];
        let options = DetectorOptions {
            large_files_threshold: 20,
        };
        let (entries, scanned) = detect(&files, &options);
        assert_eq!(scanned, 2);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file, "src/big.py");
        assert_eq!(entries[0].detail["loc"], serde_json::json!(50));
    }

    #[test]
    fn default_threshold_applies_when_unset() {
        let files = vec![file_with_lines("src/big.py", DEFAULT_LARGE_FILE_LINES + 1)];
        let (entries, _) = detect(&files, &DetectorOptions::default());
        assert_eq!(entries.len(), 1);
    }
}
