//! Atomic writes and the two-file commit journal.
//!
//! Single-store writes go through temp-file + rename in the same directory.
//! Commands that mutate both stores stage `state.json.new` + `plan.json.new`
//! first and rename both only after both staged files are durable, so a crash
//! never leaves the pair mutually inconsistent: on startup a staged file that
//! parses is rolled forward, a torn one is rolled back.

use crate::errors::PersistenceError;
use std::path::{Path, PathBuf};

pub const JOURNAL_SUFFIX: &str = "new";

fn staged_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".");
    os.push(JOURNAL_SUFFIX);
    PathBuf::from(os)
}

fn ensure_parent(path: &Path) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| PersistenceError::Write {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

pub fn atomic_write(path: &Path, content: &str) -> Result<(), PersistenceError> {
    ensure_parent(path)?;
    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    std::fs::write(&tmp, content).map_err(|e| PersistenceError::Write {
        path: tmp.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, path).map_err(|e| PersistenceError::Rename {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Stage and commit up to two stores as one transaction. Passing `None` for a
/// store leaves it untouched.
pub fn commit_pair(
    state_path: &Path,
    plan_path: &Path,
    state_json: Option<&str>,
    plan_json: Option<&str>,
) -> Result<(), PersistenceError> {
    let mut staged: Vec<(PathBuf, &Path)> = vec![];
    if let Some(json) = state_json {
        ensure_parent(state_path)?;
        let stage = staged_path(state_path);
        std::fs::write(&stage, json).map_err(|e| PersistenceError::Write {
            path: stage.clone(),
            source: e,
        })?;
        staged.push((stage, state_path));
    }
    if let Some(json) = plan_json {
        ensure_parent(plan_path)?;
        let stage = staged_path(plan_path);
        if let Err(e) = std::fs::write(&stage, json) {
            // Roll back the already-staged state file; nothing was renamed yet.
            for (s, _) in &staged {
                let _ = std::fs::remove_file(s);
            }
            return Err(PersistenceError::Write {
                path: stage,
                source: e,
            });
        }
        staged.push((stage, plan_path));
    }

    for (stage, target) in &staged {
        std::fs::rename(stage, target).map_err(|e| PersistenceError::Rename {
            path: target.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

/// Resolve a half-applied journal left by a crash. A staged file that still
/// parses as JSON is rolled forward; a torn one is discarded. Returns
/// human-readable notes about what was done.
pub fn recover_journal(state_path: &Path, plan_path: &Path) -> Vec<String> {
    let mut notes = vec![];
    for target in [state_path, plan_path] {
        let stage = staged_path(target);
        if !stage.is_file() {
            continue;
        }
        let parses = std::fs::read_to_string(&stage)
            .ok()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
            .is_some();
        if parses {
            match std::fs::rename(&stage, target) {
                Ok(()) => notes.push(format!(
                    "recovered interrupted write: rolled {} forward",
                    target.display()
                )),
                Err(e) => notes.push(format!(
                    "could not roll forward {}: {e}",
                    target.display()
                )),
            }
        } else {
            let _ = std::fs::remove_file(&stage);
            notes.push(format!(
                "discarded torn staged write for {}",
                target.display()
            ));
        }
    }
    notes
}
