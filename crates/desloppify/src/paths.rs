//! Project root resolution, zone classification, and the file walk.

use crate::config::ProjectConfig;
use globset::{Glob, GlobSet, GlobSetBuilder};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

pub const STATE_DIR_NAME: &str = ".desloppify";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Production,
    Test,
    Config,
    Generated,
    Script,
    Vendor,
}

impl Zone {
    pub fn parse(token: &str) -> Option<Zone> {
        match token {
            "production" => Some(Zone::Production),
            "test" => Some(Zone::Test),
            "config" => Some(Zone::Config),
            "generated" => Some(Zone::Generated),
            "script" => Some(Zone::Script),
            "vendor" => Some(Zone::Vendor),
            _ => None,
        }
    }
}

/// Walk upward from `start` to the nearest directory containing
/// `.desloppify/` or `.git`; fall back to `start` itself.
pub fn resolve_project_root(start: &Path) -> PathBuf {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir.join(STATE_DIR_NAME).is_dir() || dir.join(".git").exists() {
            return dir.to_path_buf();
        }
        current = dir.parent();
    }
    start.to_path_buf()
}

pub fn normalize_rel(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}

fn should_descend(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    !matches!(
        name.as_ref(),
        ".git" | ".desloppify" | "target" | "node_modules" | ".venv" | "venv" | "__pycache__"
    )
}

fn build_globset(globs: &[String]) -> Result<GlobSet, String> {
    let mut b = GlobSetBuilder::new();
    for p in globs {
        let g = Glob::new(p).map_err(|e| format!("invalid glob {p:?}: {e}"))?;
        b.add(g);
    }
    b.build().map_err(|e| format!("failed to build globset: {e}"))
}

pub fn is_code_file(rel: &str) -> bool {
    matches!(
        Path::new(rel).extension().and_then(|s| s.to_str()),
        Some("rs" | "py" | "js" | "jsx" | "ts" | "tsx" | "go" | "c" | "h" | "cc" | "cpp" | "cs")
    )
}

fn path_segments(rel: &str) -> Vec<&str> {
    rel.split('/').collect()
}

fn basename(rel: &str) -> &str {
    rel.rsplit('/').next().unwrap_or(rel)
}

/// Classify a repo-relative path into a zone. `zone_overrides` wins outright;
/// vendor beats generated beats test so vendored test fixtures stay vendor.
pub fn classify_zone(rel: &str, overrides: &BTreeMap<String, String>) -> Zone {
    if let Some(token) = overrides.get(rel)
        && let Some(zone) = Zone::parse(token)
    {
        return zone;
    }
    for (prefix, token) in overrides {
        if rel.starts_with(&format!("{}/", prefix.trim_end_matches('/')))
            && let Some(zone) = Zone::parse(token)
        {
            return zone;
        }
    }

    let segments = path_segments(rel);
    let name = basename(rel);

    if segments
        .iter()
        .any(|s| matches!(*s, "vendor" | "vendors" | "node_modules" | "third_party"))
    {
        return Zone::Vendor;
    }

    if name.ends_with(".lock")
        || name.ends_with(".min.js")
        || name.ends_with("_pb2.py")
        || name.ends_with(".generated.ts")
        || name.contains(".g.")
        || segments.iter().any(|s| matches!(*s, "generated" | "gen"))
    {
        return Zone::Generated;
    }

    if segments
        .iter()
        .any(|s| matches!(*s, "tests" | "test" | "__tests__" | "spec" | "testdata"))
        || name.starts_with("test_")
        || name.starts_with("conftest.")
        || stem_has_suffix(name, "_test")
        || stem_has_suffix(name, ".test")
        || stem_has_suffix(name, ".spec")
    {
        return Zone::Test;
    }

    if segments
        .iter()
        .any(|s| matches!(*s, "scripts" | "script" | "tools" | "bin"))
        || name.ends_with(".sh")
    {
        return Zone::Script;
    }

    if is_config_file(name) {
        return Zone::Config;
    }

    Zone::Production
}

fn stem_has_suffix(name: &str, suffix: &str) -> bool {
    let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
    stem.ends_with(suffix)
}

fn is_config_file(name: &str) -> bool {
    matches!(
        name,
        "Cargo.toml"
            | "pyproject.toml"
            | "package.json"
            | "tsconfig.json"
            | "setup.py"
            | "setup.cfg"
            | "Makefile"
            | "Dockerfile"
    ) || name.ends_with(".toml")
        || name.ends_with(".cfg")
        || name.ends_with(".ini")
        || name.ends_with(".yaml")
        || name.ends_with(".yml")
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub rel: String,
    pub path: PathBuf,
    pub zone: Zone,
}

/// Collect code files under `scan_root`, excluded globs removed, each
/// classified into a zone. Deterministically sorted by relative path.
pub fn collect_source_files(
    root: &Path,
    scan_root: &Path,
    config: &ProjectConfig,
) -> Result<Vec<SourceFile>, String> {
    let exclude = if config.exclude.is_empty() {
        None
    } else {
        Some(build_globset(&config.exclude)?)
    };

    let mut out: Vec<SourceFile> = vec![];
    for entry in WalkDir::new(scan_root)
        .follow_links(false)
        .into_iter()
        .filter_entry(should_descend)
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = normalize_rel(root, entry.path()) else {
            continue;
        };
        if !is_code_file(&rel) {
            continue;
        }
        if let Some(exc) = &exclude
            && exc.is_match(&rel)
        {
            continue;
        }
        let zone = classify_zone(&rel, &config.zone_overrides);
        out.push(SourceFile {
            rel,
            path: entry.path().to_path_buf(),
            zone,
        });
    }
    out.sort_by(|a, b| a.rel.cmp(&b.rel));
    Ok(out)
}

/// Pick the state-file language tag from the dominant extension in the tree.
pub fn detect_primary_lang(files: &[SourceFile]) -> &'static str {
    let mut rust = 0usize;
    let mut python = 0usize;
    let mut typescript = 0usize;
    for f in files {
        match Path::new(&f.rel).extension().and_then(|s| s.to_str()) {
            Some("rs") => rust += 1,
            Some("py") => python += 1,
            Some("ts" | "tsx" | "js" | "jsx") => typescript += 1,
            _ => {}
        }
    }
    let max = rust.max(python).max(typescript);
    if max == 0 {
        "mixed"
    } else if max == rust {
        "rust"
    } else if max == python {
        "python"
    } else {
        "typescript"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn zone_classification_defaults() {
        let overrides = BTreeMap::new();
        assert_eq!(classify_zone("src/app.py", &overrides), Zone::Production);
        assert_eq!(classify_zone("tests/test_app.py", &overrides), Zone::Test);
        assert_eq!(classify_zone("src/app_test.go", &overrides), Zone::Test);
        assert_eq!(classify_zone("scripts/release.py", &overrides), Zone::Script);
        assert_eq!(classify_zone("vendor/lib/x.js", &overrides), Zone::Vendor);
        assert_eq!(classify_zone("proto/api_pb2.py", &overrides), Zone::Generated);
        assert_eq!(classify_zone("pyproject.toml", &overrides), Zone::Config);
    }

    #[test]
    fn zone_override_beats_heuristics() {
        let mut overrides = BTreeMap::new();
        overrides.insert("tests".to_string(), "production".to_string());
        assert_eq!(
            classify_zone("tests/test_app.py", &overrides),
            Zone::Production
        );
    }

    #[test]
    fn vendor_wins_over_test() {
        let overrides = BTreeMap::new();
        assert_eq!(
            classify_zone("vendor/pkg/tests/test_x.py", &overrides),
            Zone::Vendor
        );
    }

    #[test]
    fn resolve_root_finds_state_dir() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join(".desloppify")).unwrap();
        fs::create_dir_all(root.join("src/deep")).unwrap();
        assert_eq!(resolve_project_root(&root.join("src/deep")), root);
    }

    #[test]
    fn collect_respects_exclude_globs() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/a.py"), "x = 1\n").unwrap();
        fs::write(root.join("src/skip_me.py"), "x = 1\n").unwrap();
        fs::write(root.join("notes.txt"), "not code\n").unwrap();

        let mut config = ProjectConfig::default();
        config.exclude.push("src/skip_*.py".to_string());
        let files = collect_source_files(root, root, &config).unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.rel.as_str()).collect();
        assert_eq!(rels, vec!["src/a.py"]);
    }

    #[test]
    fn primary_lang_detection() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("a.py"), "").unwrap();
        fs::write(root.join("b.py"), "").unwrap();
        fs::write(root.join("c.rs"), "").unwrap();
        let files = collect_source_files(root, root, &ProjectConfig::default()).unwrap();
        assert_eq!(detect_primary_lang(&files), "python");
    }
}
