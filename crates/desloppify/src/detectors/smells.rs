//! Code-smell probes. One finding per (file, subtype) with the offending
//! line numbers in `detail.lines`.

use crate::detectors::{DetectorEntry, DetectorOptions, LoadedFile, files_in_zones, registry};
use crate::state::Confidence;
use regex::Regex;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::OnceLock;

struct SmellPatterns {
    silent_except: Regex,
    py_print: Regex,
    js_console: Regex,
    rs_dbg: Regex,
    todo: Regex,
}

fn patterns() -> &'static SmellPatterns {
    static P: OnceLock<SmellPatterns> = OnceLock::new();
    P.get_or_init(|| SmellPatterns {
        silent_except: Regex::new(r"^\s*except[^:]*:\s*(pass\s*)?$").unwrap(),
        py_print: Regex::new(r"^\s*print\(").unwrap(),
        js_console: Regex::new(r"console\.(log|debug)\(").unwrap(),
        rs_dbg: Regex::new(r"\bdbg!\(").unwrap(),
        todo: Regex::new(r"(?:#|//)\s*(TODO|FIXME|XXX)\b").unwrap(),
    })
}

fn subtype_hits(file: &LoadedFile) -> BTreeMap<&'static str, Vec<usize>> {
    let p = patterns();
    let lines: Vec<&str> = file.text.lines().collect();
    let mut hits: BTreeMap<&'static str, Vec<usize>> = BTreeMap::new();
    let mut push = |subtype: &'static str, line: usize| {
        hits.entry(subtype).or_default().push(line + 1);
    };

    for (idx, line) in lines.iter().enumerate() {
        if file.rel.ends_with(".py") {
            if p.silent_except.is_match(line) {
                let swallows = line.trim_end().ends_with("pass")
                    || lines
                        .get(idx + 1)
                        .map(|next| next.trim() == "pass")
                        .unwrap_or(false);
                if swallows {
                    push("silent_except", idx);
                }
            }
            if p.py_print.is_match(line) {
                push("debug_print", idx);
            }
        }
        if (file.rel.ends_with(".ts")
            || file.rel.ends_with(".tsx")
            || file.rel.ends_with(".js")
            || file.rel.ends_with(".jsx"))
            && p.js_console.is_match(line)
        {
            push("debug_print", idx);
        }
        if file.rel.ends_with(".rs") && p.rs_dbg.is_match(line) {
            push("debug_print", idx);
        }
        if p.todo.is_match(line) {
            push("todo_comment", idx);
        }
    }
    hits
}

fn summary_for(subtype: &str, count: usize) -> String {
    match subtype {
        "silent_except" => format!("{count} silent exception handler(s) swallow errors"),
        "debug_print" => format!("{count} leftover debug print statement(s)"),
        "todo_comment" => format!("{count} unresolved TODO/FIXME marker(s)"),
        _ => format!("{count} {subtype} smell(s)"),
    }
}

fn confidence_for(subtype: &str) -> Confidence {
    match subtype {
        "silent_except" => Confidence::High,
        "debug_print" => Confidence::Medium,
        _ => Confidence::Low,
    }
}

fn tier_for(subtype: &str, default_tier: u8) -> u8 {
    match subtype {
        "todo_comment" => 3,
        _ => default_tier,
    }
}

pub fn detect(files: &[LoadedFile], _options: &DetectorOptions) -> (Vec<DetectorEntry>, usize) {
    let meta = &registry()["smells"];
    let candidates = files_in_zones(files, meta.zones);
    let mut entries = vec![];

    for file in &candidates {
        for (subtype, lines) in subtype_hits(file) {
            let mut detail = Map::new();
            detail.insert("lines".to_string(), json!(lines));
            detail.insert("kind".to_string(), Value::String(subtype.to_string()));
            detail.insert("count".to_string(), json!(lines.len()));
            entries.push(DetectorEntry {
                file: file.rel.clone(),
                name: subtype.to_string(),
                tier: tier_for(subtype, meta.default_tier),
                confidence: confidence_for(subtype),
                summary: summary_for(subtype, lines.len()),
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
    fn silent_except_grouped_per_file() {
        let files = vec![file(
            "src/a.py",
            "try:\n    go()\nexcept ValueError:\n    pass\ntry:\n    go()\nexcept:\n    pass\n",
        )];
        let (entries, _) = detect(&files, &DetectorOptions::default());
        let silent: Vec<_> = entries
            .iter()
            .filter(|e| e.name == "silent_except")
            .collect();
        assert_eq!(silent.len(), 1);
        assert_eq!(silent[0].detail["lines"], json!([3, 7]));
        assert_eq!(silent[0].confidence, Confidence::High);
    }

    #[test]
    fn debug_print_across_languages() {
        let files = vec![
            file("src/a.py", "print(\"debugging\")\n"),
            file("src/b.ts", "console.log('x')\n"),
            file("src/c.rs", "fn f() { dbg!(1); }\n"),
        ];
        let (entries, scanned) = detect(&files, &DetectorOptions::default());
        assert_eq!(scanned, 3);
        assert_eq!(
            entries.iter().filter(|e| e.name == "debug_print").count(),
            3
        );
    }

    #[test]
    fn todo_comment_is_low_confidence_tier_3() {
        let files = vec![file("src/a.py", "# TODO: rewrite this\nx = 1\n")];
        let (entries, _) = detect(&files, &DetectorOptions::default());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tier, 3);
        assert_eq!(entries[0].confidence, Confidence::Low);
    }
}
