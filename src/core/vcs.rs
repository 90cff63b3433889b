//! Version-control backend for publishing.
//!
//! [`VersionControlBackend`] exposes the handful of typed operations the
//! publish state machine needs. [`GitCliBackend`] implements them with
//! `git2` for reads (HEAD, index state, remote-tracking refs) and the `git`
//! CLI for network mutations (clone, push) and working-copy staging.
//!
//! Idempotent no-ops are reported as [`CommitOutcome::NothingToCommit`] and
//! [`PushOutcome::UpToDate`], decided from repository state rather than from
//! command output.

use crate::core::error::{MirrorError, Result};
use git2::{Repository, Signature};
use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;

/// Subject of the seed commit every version branch starts from.
pub const INIT_COMMIT_MESSAGE: &str = "Init";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    NothingToCommit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    UpToDate,
}

pub trait VersionControlBackend {
    /// Branch names on the remote, lowercased.
    fn list_remote_branches(&self, remote: &str) -> Result<BTreeSet<String>>;

    /// Create `branch` on the remote with a single empty "Init" commit and
    /// no shared history. No local branch is left behind.
    fn create_orphan_branch(&self, remote: &str, branch: &str) -> Result<()>;

    fn clone_branch(&self, remote: &str, branch: &str, destination: &Path) -> Result<()>;

    /// Subject line of HEAD, or `None` for an unborn branch.
    fn head_summary(&self, workdir: &Path) -> Result<Option<String>>;

    fn stage_all(&self, workdir: &Path) -> Result<()>;

    fn commit(&self, workdir: &Path, message: &str, amend: bool) -> Result<CommitOutcome>;

    fn push(&self, workdir: &Path, branch: &str, force_with_lease: bool) -> Result<PushOutcome>;
}

/// Map a version id onto a branch name: `[A-Za-z0-9_-]`, lowercased.
pub fn sanitize_branch_name(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

impl Default for GitIdentity {
    fn default() -> Self {
        Self {
            name: "asset-mirror".to_string(),
            email: "asset-mirror@localhost".to_string(),
        }
    }
}

pub struct GitCliBackend {
    identity: GitIdentity,
}

impl GitCliBackend {
    pub fn new(identity: GitIdentity) -> Self {
        Self { identity }
    }

    fn git(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .arg("-c")
            .arg(format!("user.name={}", self.identity.name))
            .arg("-c")
            .arg(format!("user.email={}", self.identity.email));
        cmd
    }

    fn signature(&self) -> Result<Signature<'static>> {
        Ok(Signature::now(&self.identity.name, &self.identity.email)?)
    }
}

/// Run a git command in `dir`, returning stdout. Failures are classified
/// from stderr into transient and terminal publish errors.
fn execute_git_command(mut cmd: Command, dir: &Path, operation: &'static str) -> Result<String> {
    cmd.current_dir(dir);
    log::debug!("Running {cmd:?} in {}", dir.display());

    let output = cmd.output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(classify_git_failure(operation, stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

const TERMINAL_GIT_FAILURES: &[&str] = &[
    "authentication failed",
    "permission denied",
    "could not read username",
    "repository not found",
    "does not appear to be a git repository",
    "remote branch",
    "stale info",
    "non-fast-forward",
    "protected branch",
];

fn classify_git_failure(operation: &'static str, stderr: &str) -> MirrorError {
    let lowered = stderr.to_lowercase();
    if TERMINAL_GIT_FAILURES.iter().any(|needle| lowered.contains(needle)) {
        MirrorError::publish_terminal(operation, stderr)
    } else {
        MirrorError::publish_transient(operation, stderr)
    }
}

fn parse_ls_remote(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .filter_map(|(_, reference)| reference.strip_prefix("refs/heads/"))
        .map(str::to_lowercase)
        .collect()
}

/// Read-side view of a local working copy.
pub struct WorkingCopy {
    repo: Repository,
}

impl WorkingCopy {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::open(path)?;
        Ok(Self { repo })
    }

    pub fn head_summary(&self) -> Result<Option<String>> {
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let commit = head.peel_to_commit()?;
        Ok(Some(commit.summary().unwrap_or("").to_string()))
    }

    /// True when the index differs from HEAD's tree.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let index = self.repo.index()?;
        let head_tree = match self.repo.head() {
            Ok(head) => Some(head.peel_to_tree()?),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => None,
            Err(e) => return Err(e.into()),
        };
        let diff = self
            .repo
            .diff_tree_to_index(head_tree.as_ref(), Some(&index), None)?;
        Ok(diff.deltas().len() > 0)
    }

    /// True when HEAD equals what we last saw of `origin/<branch>`.
    pub fn matches_remote(&self, branch: &str) -> Result<bool> {
        let head = self.repo.head()?.target();
        let tracking = match self
            .repo
            .find_reference(&format!("refs/remotes/origin/{branch}"))
        {
            Ok(reference) => reference.target(),
            Err(e) if e.code() == git2::ErrorCode::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(head.is_some() && head == tracking)
    }
}

impl VersionControlBackend for GitCliBackend {
    fn list_remote_branches(&self, remote: &str) -> Result<BTreeSet<String>> {
        let mut cmd = self.git();
        cmd.args(["ls-remote", "--heads", remote]);
        let cwd = std::env::temp_dir();
        let output = execute_git_command(cmd, &cwd, "list branches")?;
        Ok(parse_ls_remote(&output))
    }

    fn create_orphan_branch(&self, remote: &str, branch: &str) -> Result<()> {
        let scratch = tempfile::Builder::new().prefix("orphan-").tempdir()?;
        let repo = Repository::init_bare(scratch.path())?;
        let reference = format!("refs/heads/{branch}");

        let tree_id = repo.treebuilder(None)?.write()?;
        let tree = repo.find_tree(tree_id)?;
        let signature = self.signature()?;
        repo.commit(
            Some(&reference),
            &signature,
            &signature,
            INIT_COMMIT_MESSAGE,
            &tree,
            &[],
        )?;

        let mut cmd = self.git();
        cmd.args(["push", remote, &format!("{reference}:{reference}")]);
        execute_git_command(cmd, scratch.path(), "push orphan branch")?;

        repo.find_reference(&reference)?.delete()?;
        log::info!("Created orphan branch {branch}");
        Ok(())
    }

    fn clone_branch(&self, remote: &str, branch: &str, destination: &Path) -> Result<()> {
        let parent = destination
            .parent()
            .ok_or_else(|| MirrorError::config("working copy has no parent directory"))?;
        std::fs::create_dir_all(parent)?;

        let mut cmd = self.git();
        cmd.args(["clone", "--single-branch", "--branch", branch, remote])
            .arg(destination);
        execute_git_command(cmd, parent, "clone")?;
        Ok(())
    }

    fn head_summary(&self, workdir: &Path) -> Result<Option<String>> {
        WorkingCopy::open(workdir)?.head_summary()
    }

    fn stage_all(&self, workdir: &Path) -> Result<()> {
        let mut cmd = self.git();
        cmd.args(["add", "--all"]);
        execute_git_command(cmd, workdir, "stage")?;
        Ok(())
    }

    fn commit(&self, workdir: &Path, message: &str, amend: bool) -> Result<CommitOutcome> {
        if !WorkingCopy::open(workdir)?.has_staged_changes()? {
            return Ok(CommitOutcome::NothingToCommit);
        }

        let mut cmd = self.git();
        cmd.args(["commit", "--quiet", "-m", message]);
        if amend {
            cmd.arg("--amend");
        }
        execute_git_command(cmd, workdir, "commit")?;
        Ok(CommitOutcome::Committed)
    }

    fn push(&self, workdir: &Path, branch: &str, force_with_lease: bool) -> Result<PushOutcome> {
        if WorkingCopy::open(workdir)?.matches_remote(branch)? {
            return Ok(PushOutcome::UpToDate);
        }

        let mut cmd = self.git();
        cmd.args(["push", "--quiet"]);
        if force_with_lease {
            cmd.arg("--force-with-lease");
        }
        cmd.args(["origin", &format!("HEAD:refs/heads/{branch}")]);
        execute_git_command(cmd, workdir, "push")?;
        Ok(PushOutcome::Pushed)
    }
}
