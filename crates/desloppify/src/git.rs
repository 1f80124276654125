//! Best-effort project metadata from git. Lookups time out after 5 seconds
//! and fail silently; nothing here is load-bearing.

use std::path::Path;
use std::process::Command;
use std::sync::mpsc;
use std::time::Duration;

const GIT_TIMEOUT: Duration = Duration::from_secs(5);

fn run_git(root: &Path, args: &[&str]) -> Option<String> {
    let root = root.to_path_buf();
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let output = Command::new("git").arg("-C").arg(&root).args(&args).output();
        let _ = tx.send(output);
    });
    let output = rx.recv_timeout(GIT_TIMEOUT).ok()?.ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}

/// Project name from the origin remote, falling back to the root directory
/// name.
pub fn project_name(root: &Path) -> Option<String> {
    if let Some(url) = run_git(root, &["remote", "get-url", "origin"]) {
        let tail = url
            .trim_end_matches('/')
            .rsplit(['/', ':'])
            .next()
            .unwrap_or("")
            .trim_end_matches(".git");
        if !tail.is_empty() {
            return Some(tail.to_string());
        }
    }
    root.file_name().map(|n| n.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn falls_back_to_directory_name() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("my-project");
        std::fs::create_dir_all(&project).unwrap();
        assert_eq!(project_name(&project), Some("my-project".to_string()));
    }
}
