//! Explicit runtime context threaded through commands: project root, store
//! paths, resolved language tag, and loaded config.

use crate::config::{ProjectConfig, load_config};
use crate::errors::PersistenceError;
use crate::journal;
use crate::paths::{STATE_DIR_NAME, collect_source_files, detect_primary_lang, resolve_project_root};
use crate::plan::{Plan, load_plan, plan_to_json};
use crate::state::{State, load_state, state_to_json};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Runtime {
    pub root: PathBuf,
    pub lang: String,
    pub config: ProjectConfig,
}

fn existing_state_langs(state_dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(state_dir) else {
        return vec![];
    };
    let mut langs = vec![];
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(rest) = name.strip_prefix("state-")
            && let Some(lang) = rest.strip_suffix(".json")
        {
            langs.push(lang.to_string());
        }
    }
    langs.sort();
    langs
}

impl Runtime {
    /// Resolve the project root, load config, and settle the language tag:
    /// explicit flag, else the single existing state file, else detection
    /// over the tree.
    pub fn discover(start: &Path, lang: Option<&str>) -> Runtime {
        let root = resolve_project_root(start);
        let config = load_config(&root.join(STATE_DIR_NAME).join("config.json"));

        let lang = match lang {
            Some(lang) => lang.to_string(),
            None => {
                let existing = existing_state_langs(&root.join(STATE_DIR_NAME));
                match existing.as_slice() {
                    [only] => only.clone(),
                    [first, ..] => first.clone(),
                    [] => collect_source_files(&root, &root, &config)
                        .map(|files| detect_primary_lang(&files).to_string())
                        .unwrap_or_else(|_| "mixed".to_string()),
                }
            }
        };

        Runtime { root, lang, config }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR_NAME)
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir().join(format!("state-{}.json", self.lang))
    }

    pub fn plan_path(&self) -> PathBuf {
        self.state_dir().join("plan.json")
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir().join("config.json")
    }

    pub fn query_path(&self) -> PathBuf {
        self.state_dir().join("query.json")
    }

    /// Load both stores as a coherent snapshot, resolving any half-applied
    /// journal first.
    pub fn load_stores(&self) -> (State, Plan) {
        for note in journal::recover_journal(&self.state_path(), &self.plan_path()) {
            eprintln!("Warning: {note}.");
        }
        (load_state(&self.state_path()), load_plan(&self.plan_path()))
    }

    /// Commit mutated stores through the two-file journal. Passing `None`
    /// leaves that store untouched; neither file is replaced unless both
    /// serialize.
    pub fn commit(
        &self,
        state: Option<&mut State>,
        plan: Option<&mut Plan>,
    ) -> Result<(), PersistenceError> {
        let state_json = match state {
            Some(state) => Some(state_to_json(state)?),
            None => None,
        };
        let plan_json = match plan {
            Some(plan) => Some(plan_to_json(plan)?),
            None => None,
        };
        journal::commit_pair(
            &self.state_path(),
            &self.plan_path(),
            state_json.as_deref(),
            plan_json.as_deref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn discover_prefers_existing_state_file_lang() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join(".desloppify")).unwrap();
        std::fs::write(root.join(".desloppify/state-python.json"), "{}").unwrap();
        let rt = Runtime::discover(root, None);
        assert_eq!(rt.lang, "python");
        assert!(rt.state_path().ends_with(".desloppify/state-python.json"));
    }

    #[test]
    fn discover_detects_lang_from_tree() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join(".desloppify")).unwrap();
        std::fs::write(root.join("main.rs"), "fn main() {}\n").unwrap();
        let rt = Runtime::discover(root, None);
        assert_eq!(rt.lang, "rust");
    }

    #[test]
    fn explicit_lang_wins() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join(".desloppify")).unwrap();
        let rt = Runtime::discover(root, Some("typescript"));
        assert_eq!(rt.lang, "typescript");
    }

    #[test]
    fn commit_writes_both_stores_atomically() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join(".desloppify")).unwrap();
        let rt = Runtime::discover(root, Some("python"));

        let mut state = State::default();
        let mut plan = Plan::default();
        plan.queue_order.push("unused::a.py::os".to_string());
        rt.commit(Some(&mut state), Some(&mut plan)).unwrap();

        let (loaded_state, loaded_plan) = rt.load_stores();
        assert_eq!(loaded_state.version, crate::state::STATE_VERSION);
        assert_eq!(loaded_plan.queue_order, vec!["unused::a.py::os"]);
    }

    #[test]
    fn invalid_plan_rolls_back_state_write() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join(".desloppify")).unwrap();
        let rt = Runtime::discover(root, Some("python"));

        let mut state = State::default();
        state.scan_count = 7;
        let mut plan = Plan::default();
        // Violates the queue/skipped disjointness invariant.
        plan.queue_order.push("x".to_string());
        plan.skipped.insert(
            "x".to_string(),
            crate::plan::SkipEntry {
                finding_id: "x".to_string(),
                kind: crate::plan::SkipKind::Temporary,
                reason: None,
                note: None,
                attestation: None,
                created_at: crate::state::utc_now(),
                review_after: None,
                skipped_at_scan: 0,
            },
        );

        assert!(rt.commit(Some(&mut state), Some(&mut plan)).is_err());
        assert!(!rt.state_path().exists());
        assert!(!rt.plan_path().exists());
    }
}
