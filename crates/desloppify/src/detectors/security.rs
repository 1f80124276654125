//! Security probes: dynamic evaluation, shell-escape subprocesses, and
//! hardcoded credentials.

use crate::detectors::{DetectorEntry, DetectorOptions, LoadedFile, files_in_zones, registry};
use crate::state::Confidence;
use regex::Regex;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::OnceLock;

struct SecurityPatterns {
    eval_exec: Regex,
    shell_true: Regex,
    hardcoded_secret: Regex,
}

fn patterns() -> &'static SecurityPatterns {
    static P: OnceLock<SecurityPatterns> = OnceLock::new();
    P.get_or_init(|| SecurityPatterns {
        eval_exec: Regex::new(r"\b(eval|exec)\s*\(").unwrap(),
        shell_true: Regex::new(r"shell\s*=\s*True").unwrap(),
        hardcoded_secret: Regex::new(
            r#"(?i)\b(api[_-]?key|secret|password|auth[_-]?token)\s*[:=]\s*["'][^"']{8,}["']"#,
        )
        .unwrap(),
    })
}

fn subtype_hits(file: &LoadedFile) -> BTreeMap<&'static str, Vec<usize>> {
    let p = patterns();
    let mut hits: BTreeMap<&'static str, Vec<usize>> = BTreeMap::new();
    for (idx, line) in file.text.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') || trimmed.starts_with("//") {
            continue;
        }
        if p.eval_exec.is_match(line) {
            hits.entry("eval_exec").or_default().push(idx + 1);
        }
        if p.shell_true.is_match(line) {
            hits.entry("shell_true").or_default().push(idx + 1);
        }
        if p.hardcoded_secret.is_match(line) {
            hits.entry("hardcoded_secret").or_default().push(idx + 1);
        }
    }
    hits
}

fn describe(subtype: &str, count: usize) -> (String, Confidence) {
    match subtype {
        "eval_exec" => (
            format!("{count} dynamic eval/exec call(s)"),
            Confidence::Medium,
        ),
        "shell_true" => (
            format!("{count} subprocess call(s) with shell=True"),
            Confidence::High,
        ),
        "hardcoded_secret" => (
            format!("{count} hardcoded credential(s)"),
            Confidence::Medium,
        ),
        _ => (format!("{count} {subtype} pattern(s)"), Confidence::Low),
    }
}

pub fn detect(files: &[LoadedFile], _options: &DetectorOptions) -> (Vec<DetectorEntry>, usize) {
    let meta = &registry()["security"];
    let candidates = files_in_zones(files, meta.zones);
    let mut entries = vec![];

    for file in &candidates {
        for (subtype, lines) in subtype_hits(file) {
            let (summary, confidence) = describe(subtype, lines.len());
            let mut detail = Map::new();
            detail.insert("lines".to_string(), json!(lines));
            detail.insert("kind".to_string(), Value::String(subtype.to_string()));
            detail.insert("count".to_string(), json!(lines.len()));
            entries.push(DetectorEntry {
                file: file.rel.clone(),
                name: subtype.to_string(),
                tier: meta.default_tier,
                confidence,
                summary,
                detail,
            });
        }
    }

    (entries, candidates.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::Zone;

    fn file(rel: &str, text: &str) -> LoadedFile {
        LoadedFile {
            rel: rel.to_string(),
            zone: Zone::Production,
            text: text.to_string(),
        }
    }

    #[test]
    fn flags_shell_true_and_eval() {
        let files = vec![file(
            "src/run.py",
            "import subprocess\nsubprocess.run(cmd, shell=True)\neval(user_input)\n",
        )];
        let (entries, _) = detect(&files, &DetectorOptions::default());
        let subtypes: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert!(subtypes.contains(&"shell_true"));
        assert!(subtypes.contains(&"eval_exec"));
    }

    #[test]
    fn flags_hardcoded_secret() {
        let files = vec![file("src/cfg.py", "API_KEY = \"sk-abcdef123456\"\n")];
        let (entries, _) = detect(&files, &DetectorOptions::default());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "hardcoded_secret");
    }

    #[test]
    fn comment_lines_are_ignored() {
        let files = vec![file("src/a.py", "# eval(example) in docs\n")];
        let (entries, _) = detect(&files, &DetectorOptions::default());
        assert!(entries.is_empty());
    }
}
