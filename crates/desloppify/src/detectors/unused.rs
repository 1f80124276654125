//! Unused-import probe. Regex-level, per-language: an imported name that
//! never appears again in the file is flagged. Auto-fixable (tier 1).

use crate::detectors::{DetectorEntry, DetectorOptions, LoadedFile, files_in_zones, registry};
use crate::state::Confidence;
use regex::Regex;
use serde_json::{Map, Value, json};
use std::sync::OnceLock;

struct ImportPatterns {
    py_import: Regex,
    py_from: Regex,
    rs_use: Regex,
    ts_named: Regex,
    ts_default: Regex,
}

fn patterns() -> &'static ImportPatterns {
    static P: OnceLock<ImportPatterns> = OnceLock::new();
    P.get_or_init(|| ImportPatterns {
        py_import: Regex::new(r"^import\s+([\w.]+)(?:\s+as\s+(\w+))?\s*$").unwrap(),
        py_from: Regex::new(r"^from\s+[\w.]+\s+import\s+(.+)$").unwrap(),
        rs_use: Regex::new(r"^\s*use\s+[\w:]+::(\w+)(?:\s+as\s+(\w+))?\s*;").unwrap(),
        ts_named: Regex::new(r#"^import\s+\{([^}]+)\}\s+from\s+['"]"#).unwrap(),
        ts_default: Regex::new(r#"^import\s+(\w+)\s+from\s+['"]"#).unwrap(),
    })
}

fn imported_names(rel: &str, line: &str) -> Vec<String> {
    let p = patterns();
    let mut names = vec![];
    if rel.ends_with(".py") {
        if let Some(caps) = p.py_import.captures(line) {
            let name = caps
                .get(2)
                .or(caps.get(1))
                .map(|m| m.as_str())
                .unwrap_or("");
            // `import a.b` binds the top-level module name.
            names.push(name.split('.').next().unwrap_or(name).to_string());
        } else if let Some(caps) = p.py_from.captures(line) {
            let imported = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            if !imported.contains('*') && !imported.contains('(') {
                for part in imported.split(',') {
                    let part = part.trim();
                    let bound = part
                        .split_once(" as ")
                        .map(|(_, alias)| alias.trim())
                        .unwrap_or(part);
                    if !bound.is_empty() {
                        names.push(bound.to_string());
                    }
                }
            }
        }
    } else if rel.ends_with(".rs") {
        if let Some(caps) = p.rs_use.captures(line) {
            let name = caps
                .get(2)
                .or(caps.get(1))
                .map(|m| m.as_str())
                .unwrap_or("");
            if name != "self" {
                names.push(name.to_string());
            }
        }
    } else if let Some(caps) = p.ts_named.captures(line) {
        for part in caps.get(1).map(|m| m.as_str()).unwrap_or("").split(',') {
            let part = part.trim();
            let bound = part
                .split_once(" as ")
                .map(|(_, alias)| alias.trim())
                .unwrap_or(part);
            if !bound.is_empty() {
                names.push(bound.to_string());
            }
        }
    } else if let Some(caps) = p.ts_default.captures(line) {
        names.push(caps.get(1).map(|m| m.as_str()).unwrap_or("").to_string());
    }
    names.retain(|n| !n.is_empty() && n.chars().all(|c| c.is_alphanumeric() || c == '_'));
    names
}

fn used_elsewhere(name: &str, lines: &[&str], import_line: usize) -> bool {
    let Ok(re) = Regex::new(&format!(r"\b{}\b", regex::escape(name))) else {
        return true;
    };
    lines
        .iter()
        .enumerate()
        .any(|(i, line)| i != import_line && re.is_match(line))
}

pub fn detect(files: &[LoadedFile], _options: &DetectorOptions) -> (Vec<DetectorEntry>, usize) {
    let meta = &registry()["unused"];
    let candidates = files_in_zones(files, meta.zones);
    let mut entries = vec![];

    for file in &candidates {
        let lines: Vec<&str> = file.text.lines().collect();
        for (idx, line) in lines.iter().enumerate() {
            for name in imported_names(&file.rel, line) {
                if used_elsewhere(&name, &lines, idx) {
                    continue;
                }
                let mut detail = Map::new();
                detail.insert("lines".to_string(), json!([idx + 1]));
                detail.insert("kind".to_string(), Value::String("unused_import".into()));
                entries.push(DetectorEntry {
                    file: file.rel.clone(),
                    name: name.clone(),
                    tier: meta.default_tier,
                    confidence: Confidence::High,
                    summary: format!("Unused import: {name}"),
                    detail,
                });
            }
        }
    }

    (entries, candidates.len())
}
