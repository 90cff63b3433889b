//! Bare remote setup and inspection utilities
//!
//! Publishing is tested against a local bare repository standing in for the
//! hosted remote. The helpers here create it and read branches back out of
//! it with plain `git` commands.

#![allow(dead_code)]

use asset_mirror::core::error::{MirrorError, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// A bare repository in a temporary directory. The TempDir must be kept
/// alive for the duration of the test to prevent cleanup.
pub struct TestRemote {
    pub temp_dir: TempDir,
    pub path: PathBuf,
}

impl TestRemote {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remote location as passed to `git clone`/`git push`.
    pub fn url(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Sets up an empty bare repository.
pub fn setup_bare_remote() -> Result<TestRemote> {
    let temp_dir = TempDir::new().map_err(MirrorError::Io)?;
    let path = temp_dir.path().join("remote.git");
    std::fs::create_dir_all(&path)?;
    git_output(&path, &["init", "--bare", "--quiet"])?;
    Ok(TestRemote { temp_dir, path })
}

/// Runs git in `dir` and returns trimmed stdout, failing on a non-zero exit.
pub fn git_output(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(MirrorError::Io)?;
    if !output.status.success() {
        return Err(MirrorError::Io(std::io::Error::other(format!(
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ))));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Number of commits reachable from `branch`.
pub fn commit_count(remote: &Path, branch: &str) -> Result<usize> {
    let count = git_output(remote, &["rev-list", "--count", branch])?;
    count
        .parse()
        .map_err(|_| MirrorError::Io(std::io::Error::other(format!("bad count '{count}'"))))
}

/// Subject line of the tip of `branch`.
pub fn head_subject(remote: &Path, branch: &str) -> Result<String> {
    git_output(remote, &["log", "-1", "--format=%s", branch])
}

/// Every file tracked at the tip of `branch`, sorted.
pub fn tracked_files(remote: &Path, branch: &str) -> Result<Vec<String>> {
    let listing = git_output(remote, &["ls-tree", "-r", "--name-only", branch])?;
    let mut files: Vec<String> = listing.lines().map(str::to_string).collect();
    files.sort();
    Ok(files)
}

/// Content of `path` at the tip of `branch`.
pub fn show_file(remote: &Path, branch: &str, path: &str) -> Result<String> {
    git_output(remote, &["show", &format!("{branch}:{path}")])
}
