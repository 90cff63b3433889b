//! Publish orchestration.
//!
//! Each version is driven through
//! `NeedsBranch -> Cloning -> Staging -> Committing -> Pushing -> CleaningUp -> Done`,
//! with `Failed` reachable from any state before `Done`. Every step is safe
//! to repeat: a run interrupted anywhere is redone from the start on the
//! next invocation, and re-publishing unchanged content commits and pushes
//! nothing.
//!
//! Working copies live under `<git-root>/<version-id>`. Overlays staged into
//! a working copy are always released before the working copy is deleted.

use crate::core::digest::Digest;
use crate::core::error::{MirrorError, Result};
use crate::core::markers::{CompletionMarkers, Stage};
use crate::core::materialize::link_or_copy;
use crate::core::overlay::{MountGuard, OverlayMount};
use crate::core::progress::ProgressObserver;
use crate::core::vcs::{
    sanitize_branch_name, CommitOutcome, PushOutcome, VersionControlBackend, INIT_COMMIT_MESSAGE,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_COMMIT_TEMPLATE: &str =
    "Upload of version {versionId}\n\nManifest: {versionSha}\nAsset index: {assetIndexSha}";
pub const DEFAULT_PUBLISH_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    NeedsBranch,
    Cloning,
    Staging,
    Committing,
    Pushing,
    CleaningUp,
    Done,
    Failed,
}

impl PublishState {
    pub fn label(self) -> &'static str {
        match self {
            Self::NeedsBranch => "creating branch",
            Self::Cloning => "cloning repository",
            Self::Staging => "staging files",
            Self::Committing => "committing files",
            Self::Pushing => "pushing files",
            Self::CleaningUp => "cleaning up",
            Self::Done => "finished",
            Self::Failed => "failed",
        }
    }

    fn ordinal(self) -> usize {
        match self {
            Self::NeedsBranch => 0,
            Self::Cloning => 1,
            Self::Staging => 2,
            Self::Committing => 3,
            Self::Pushing => 4,
            Self::CleaningUp => 5,
            Self::Done | Self::Failed => 6,
        }
    }
}

/// Branch history shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryMode {
    /// One commit per publish. The first one replaces "Init".
    #[default]
    Additive,
    /// A single commit, amended on every publish.
    Squash,
}

#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub remote_url: String,
    pub git_root: PathBuf,
    pub output_root: PathBuf,
    pub commit_template: String,
    pub history: HistoryMode,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub version_id: String,
    pub manifest_digest: Digest,
    pub asset_index_digest: Option<Digest>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub state: PublishState,
    pub transitions: Vec<PublishState>,
    pub skipped: bool,
    pub branch_created: bool,
    pub commit: Option<CommitOutcome>,
    pub push: Option<PushOutcome>,
}

impl PublishReport {
    fn skipped() -> Self {
        Self {
            state: PublishState::Done,
            transitions: vec![PublishState::Done],
            skipped: true,
            branch_created: false,
            commit: None,
            push: None,
        }
    }
}

/// Substitute `{versionId}`, `{versionSha}` and `{assetIndexSha}`.
pub fn render_commit_message(template: &str, request: &PublishRequest) -> String {
    let asset_index = request
        .asset_index_digest
        .as_ref()
        .map(|d| d.as_hex().to_string())
        .unwrap_or_default();
    template
        .replace("{versionId}", &request.version_id)
        .replace("{versionSha}", request.manifest_digest.as_hex())
        .replace("{assetIndexSha}", &asset_index)
}

struct PublishRun<'a, 'r> {
    request: &'r PublishRequest,
    branch: String,
    workdir: PathBuf,
    source: PathBuf,
    amend: bool,
    mounts: Option<MountGuard<'a>>,
    report: PublishReport,
}

pub struct PublishOrchestrator<'a> {
    backend: &'a dyn VersionControlBackend,
    overlay: &'a dyn OverlayMount,
    markers: &'a CompletionMarkers,
    settings: PublishSettings,
}

impl<'a> PublishOrchestrator<'a> {
    pub fn new(
        backend: &'a dyn VersionControlBackend,
        overlay: &'a dyn OverlayMount,
        markers: &'a CompletionMarkers,
        settings: PublishSettings,
    ) -> Self {
        Self {
            backend,
            overlay,
            markers,
            settings,
        }
    }

    pub fn working_copy(&self, version_id: &str) -> PathBuf {
        self.settings.git_root.join(version_id)
    }

    pub fn publish(
        &self,
        request: &PublishRequest,
        progress: &dyn ProgressObserver,
    ) -> Result<PublishReport> {
        if self.markers.should_skip_publish(&request.manifest_digest) {
            log::info!("Skipping publish of {}: nothing new", request.version_id);
            return Ok(PublishReport::skipped());
        }

        let mut run = PublishRun {
            request,
            branch: sanitize_branch_name(&request.version_id),
            workdir: self.working_copy(&request.version_id),
            source: self.settings.output_root.join(&request.version_id),
            amend: false,
            mounts: None,
            report: PublishReport {
                state: PublishState::NeedsBranch,
                transitions: vec![PublishState::NeedsBranch],
                skipped: false,
                branch_created: false,
                commit: None,
                push: None,
            },
        };

        let mut state = PublishState::NeedsBranch;
        while state != PublishState::Done {
            progress.on_progress(state.label(), state.ordinal(), Some(PublishState::Done.ordinal()));
            state = match self.step(state, &mut run) {
                Ok(next) => next,
                Err(e) => {
                    log::error!(
                        "Publishing {} failed while {}: {e}",
                        request.version_id,
                        state.label()
                    );
                    self.abandon(&mut run, progress);
                    return Err(e);
                }
            };
            log::debug!("{}: {:?}", request.version_id, state);
            run.report.transitions.push(state);
        }
        progress.on_progress(state.label(), state.ordinal(), Some(state.ordinal()));

        run.report.state = PublishState::Done;
        Ok(run.report)
    }

    fn step(&self, state: PublishState, run: &mut PublishRun<'a, '_>) -> Result<PublishState> {
        match state {
            PublishState::NeedsBranch => {
                let branches = self.backend.list_remote_branches(&self.settings.remote_url)?;
                if !branches.contains(&run.branch) {
                    self.backend
                        .create_orphan_branch(&self.settings.remote_url, &run.branch)?;
                    run.report.branch_created = true;
                }
                Ok(PublishState::Cloning)
            }
            PublishState::Cloning => {
                self.discard_working_copy(&run.workdir)?;
                self.backend
                    .clone_branch(&self.settings.remote_url, &run.branch, &run.workdir)?;
                Ok(PublishState::Staging)
            }
            PublishState::Staging => {
                self.stage(run)?;
                Ok(PublishState::Committing)
            }
            PublishState::Committing => {
                let message = render_commit_message(&self.settings.commit_template, run.request);
                let outcome = self.with_retry("commit", || {
                    self.backend.commit(&run.workdir, &message, run.amend)
                })?;
                run.report.commit = Some(outcome);
                Ok(PublishState::Pushing)
            }
            PublishState::Pushing => {
                let rewrote = run.amend && run.report.commit == Some(CommitOutcome::Committed);
                let outcome = self.with_retry("push", || {
                    self.backend.push(&run.workdir, &run.branch, rewrote)
                })?;
                run.report.push = Some(outcome);
                Ok(PublishState::CleaningUp)
            }
            PublishState::CleaningUp => {
                if let Some(mut mounts) = run.mounts.take() {
                    mounts.release()?;
                }
                self.discard_working_copy(&run.workdir)?;
                self.markers
                    .mark(Stage::Publish, &run.request.manifest_digest)?;
                Ok(PublishState::Done)
            }
            PublishState::Done | PublishState::Failed => Ok(state),
        }
    }

    fn stage(&self, run: &mut PublishRun<'a, '_>) -> Result<()> {
        if !run.source.is_dir() {
            return Err(MirrorError::not_found(
                "Output tree",
                run.source.display().to_string(),
            ));
        }
        clear_working_copy(&run.workdir)?;

        let mut mounts = MountGuard::new(self.overlay);
        for entry in fs::read_dir(&run.source)? {
            let entry = entry?;
            let target = run.workdir.join(entry.file_name());
            if entry.file_type()?.is_dir() {
                mounts.mount(&entry.path(), &target)?;
            } else {
                link_or_copy(&entry.path(), &target)?;
            }
        }
        run.mounts = Some(mounts);

        let head = self.backend.head_summary(&run.workdir)?;
        run.amend = match self.settings.history {
            HistoryMode::Squash => true,
            HistoryMode::Additive => head.as_deref() == Some(INIT_COMMIT_MESSAGE),
        };
        self.backend.stage_all(&run.workdir)
    }

    fn with_retry<T>(&self, operation: &'static str, mut attempt: impl FnMut() -> Result<T>) -> Result<T> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut tries = 1;
        loop {
            match attempt() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient_publish() && tries < max_attempts => {
                    log::warn!("{operation} attempt {tries}/{max_attempts} failed: {e}");
                    std::thread::sleep(self.settings.retry_delay);
                    tries += 1;
                }
                Err(MirrorError::PublishTransient { message, .. }) => {
                    return Err(MirrorError::PublishTransient {
                        operation,
                        attempts: tries,
                        message,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Release overlays, then delete the working copy.
    fn discard_working_copy(&self, workdir: &Path) -> Result<()> {
        if !workdir.exists() {
            return Ok(());
        }
        let released = self.overlay.unmount_all_under(workdir)?;
        if released > 0 {
            log::info!("Released {released} stale overlay(s) under {}", workdir.display());
        }
        fs::remove_dir_all(workdir)?;
        Ok(())
    }

    /// Best-effort cleanup after a failure. The working copy is kept when
    /// an overlay could not be released.
    fn abandon(&self, run: &mut PublishRun<'a, '_>, progress: &dyn ProgressObserver) {
        run.report.state = PublishState::Failed;
        run.report.transitions.push(PublishState::Failed);
        progress.on_progress(PublishState::Failed.label(), 0, None);

        if let Some(mut mounts) = run.mounts.take() {
            if let Err(e) = mounts.release() {
                log::error!("Leaving {} in place: {e}", run.workdir.display());
                return;
            }
        }
        if let Err(e) = self.discard_working_copy(&run.workdir) {
            log::error!("Failed to clean up {}: {e}", run.workdir.display());
        }
    }
}

/// Remove everything in a working copy except `.git`.
fn clear_working_copy(workdir: &Path) -> Result<()> {
    for entry in fs::read_dir(workdir)? {
        let entry = entry?;
        if entry.file_name() == ".git" {
            continue;
        }
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::digest::HashAlgorithm;
    use crate::core::overlay::LinkOverlay;
    use crate::core::progress::NoProgress;
    use std::cell::RefCell;
    use std::collections::{BTreeSet, VecDeque};
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeBackend {
        branches: RefCell<BTreeSet<String>>,
        head: RefCell<Option<String>>,
        commit_results: RefCell<VecDeque<Result<CommitOutcome>>>,
        push_results: RefCell<VecDeque<Result<PushOutcome>>>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeBackend {
        fn calls(&self, prefix: &str) -> usize {
            self.calls
                .borrow()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .count()
        }
    }

    impl VersionControlBackend for FakeBackend {
        fn list_remote_branches(&self, _remote: &str) -> Result<BTreeSet<String>> {
            Ok(self.branches.borrow().clone())
        }

        fn create_orphan_branch(&self, _remote: &str, branch: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("orphan {branch}"));
            self.branches.borrow_mut().insert(branch.to_string());
            *self.head.borrow_mut() = Some("Init".to_string());
            Ok(())
        }

        fn clone_branch(&self, _remote: &str, branch: &str, destination: &Path) -> Result<()> {
            self.calls.borrow_mut().push(format!("clone {branch}"));
            fs::create_dir_all(destination.join(".git"))?;
            fs::write(destination.join("stale.txt"), b"old")?;
            Ok(())
        }

        fn head_summary(&self, _workdir: &Path) -> Result<Option<String>> {
            Ok(self.head.borrow().clone())
        }

        fn stage_all(&self, workdir: &Path) -> Result<()> {
            assert!(!workdir.join("stale.txt").exists());
            self.calls.borrow_mut().push("stage".to_string());
            Ok(())
        }

        fn commit(&self, _workdir: &Path, message: &str, amend: bool) -> Result<CommitOutcome> {
            self.calls
                .borrow_mut()
                .push(format!("commit amend={amend} {message}"));
            self.commit_results
                .borrow_mut()
                .pop_front()
                .unwrap_or(Ok(CommitOutcome::Committed))
        }

        fn push(&self, _workdir: &Path, _branch: &str, force: bool) -> Result<PushOutcome> {
            self.calls.borrow_mut().push(format!("push force={force}"));
            self.push_results
                .borrow_mut()
                .pop_front()
                .unwrap_or(Ok(PushOutcome::Pushed))
        }
    }

    struct Fixture {
        temp: TempDir,
        markers: CompletionMarkers,
        request: PublishRequest,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let markers = CompletionMarkers::new(&temp.path().join("cache"));
            let request = PublishRequest {
                version_id: "1.21".to_string(),
                manifest_digest: HashAlgorithm::Sha1.digest_bytes(b"manifest"),
                asset_index_digest: Some(HashAlgorithm::Sha1.digest_bytes(b"index")),
            };
            let out = temp.path().join("out/1.21");
            fs::create_dir_all(out.join("assets/minecraft")).unwrap();
            fs::write(out.join("assets/minecraft/sounds.json"), b"{}").unwrap();
            fs::write(out.join("version.json"), b"{}").unwrap();
            markers
                .mark(Stage::Download, &request.manifest_digest)
                .unwrap();
            Self {
                temp,
                markers,
                request,
            }
        }

        fn settings(&self, history: HistoryMode) -> PublishSettings {
            PublishSettings {
                remote_url: "fake://remote".to_string(),
                git_root: self.temp.path().join("git"),
                output_root: self.temp.path().join("out"),
                commit_template: "{versionId} {assetIndexSha}".to_string(),
                history,
                max_attempts: DEFAULT_PUBLISH_ATTEMPTS,
                retry_delay: Duration::ZERO,
            }
        }
    }

    #[test]
    fn test_render_commit_message() {
        let request = PublishRequest {
            version_id: "24w14a".to_string(),
            manifest_digest: Digest::sha1("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d").unwrap(),
            asset_index_digest: None,
        };
        assert_eq!(
            render_commit_message("{versionId}: {versionSha} [{assetIndexSha}]", &request),
            "24w14a: aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d []"
        );
    }

    #[test]
    fn test_new_branch_walks_every_state() -> Result<()> {
        let fixture = Fixture::new();
        let backend = FakeBackend::default();
        let overlay = LinkOverlay::new();
        let orchestrator = PublishOrchestrator::new(
            &backend,
            &overlay,
            &fixture.markers,
            fixture.settings(HistoryMode::Additive),
        );

        let report = orchestrator.publish(&fixture.request, &NoProgress)?;
        assert_eq!(
            report.transitions,
            vec![
                PublishState::NeedsBranch,
                PublishState::Cloning,
                PublishState::Staging,
                PublishState::Committing,
                PublishState::Pushing,
                PublishState::CleaningUp,
                PublishState::Done,
            ]
        );
        assert!(report.branch_created);
        assert_eq!(backend.calls("orphan 1_21"), 1);
        // First publish on top of "Init" amends and force-pushes.
        let index_hex = HashAlgorithm::Sha1.digest_bytes(b"index").to_string();
        assert_eq!(backend.calls(&format!("commit amend=true 1.21 {index_hex}")), 1);
        assert_eq!(backend.calls("push force=true"), 1);

        assert!(!orchestrator.working_copy("1.21").exists());
        assert!(overlay.active().is_empty());
        assert!(fixture
            .markers
            .exists(Stage::Publish, &fixture.request.manifest_digest));
        Ok(())
    }

    #[test]
    fn test_additive_mode_commits_on_top_of_previous_publish() -> Result<()> {
        let fixture = Fixture::new();
        let backend = FakeBackend::default();
        backend.branches.borrow_mut().insert("1_21".to_string());
        *backend.head.borrow_mut() = Some("1.21 older".to_string());
        let overlay = LinkOverlay::new();
        let orchestrator = PublishOrchestrator::new(
            &backend,
            &overlay,
            &fixture.markers,
            fixture.settings(HistoryMode::Additive),
        );

        let report = orchestrator.publish(&fixture.request, &NoProgress)?;
        assert!(!report.branch_created);
        assert_eq!(backend.calls("commit amend=false"), 1);
        assert_eq!(backend.calls("push force=false"), 1);
        Ok(())
    }

    #[test]
    fn test_squash_mode_always_amends() -> Result<()> {
        let fixture = Fixture::new();
        let backend = FakeBackend::default();
        backend.branches.borrow_mut().insert("1_21".to_string());
        *backend.head.borrow_mut() = Some("1.21 older".to_string());
        let overlay = LinkOverlay::new();
        let orchestrator = PublishOrchestrator::new(
            &backend,
            &overlay,
            &fixture.markers,
            fixture.settings(HistoryMode::Squash),
        );

        orchestrator.publish(&fixture.request, &NoProgress)?;
        assert_eq!(backend.calls("commit amend=true"), 1);
        assert_eq!(backend.calls("push force=true"), 1);
        Ok(())
    }

    #[test]
    fn test_nothing_to_commit_is_success() -> Result<()> {
        let fixture = Fixture::new();
        let backend = FakeBackend::default();
        backend.branches.borrow_mut().insert("1_21".to_string());
        backend
            .commit_results
            .borrow_mut()
            .push_back(Ok(CommitOutcome::NothingToCommit));
        backend
            .push_results
            .borrow_mut()
            .push_back(Ok(PushOutcome::UpToDate));
        let overlay = LinkOverlay::new();
        let orchestrator = PublishOrchestrator::new(
            &backend,
            &overlay,
            &fixture.markers,
            fixture.settings(HistoryMode::Squash),
        );

        let report = orchestrator.publish(&fixture.request, &NoProgress)?;
        assert_eq!(report.state, PublishState::Done);
        assert_eq!(report.commit, Some(CommitOutcome::NothingToCommit));
        assert_eq!(report.push, Some(PushOutcome::UpToDate));
        // Nothing was rewritten, so no lease is needed.
        assert_eq!(backend.calls("push force=false"), 1);
        Ok(())
    }

    #[test]
    fn test_transient_commit_failure_is_retried() -> Result<()> {
        let fixture = Fixture::new();
        let backend = FakeBackend::default();
        backend.branches.borrow_mut().insert("1_21".to_string());
        {
            let mut results = backend.commit_results.borrow_mut();
            results.push_back(Err(MirrorError::publish_transient("commit", "index.lock exists")));
            results.push_back(Err(MirrorError::publish_transient("commit", "index.lock exists")));
            results.push_back(Ok(CommitOutcome::Committed));
        }
        let overlay = LinkOverlay::new();
        let orchestrator = PublishOrchestrator::new(
            &backend,
            &overlay,
            &fixture.markers,
            fixture.settings(HistoryMode::Additive),
        );

        let report = orchestrator.publish(&fixture.request, &NoProgress)?;
        assert_eq!(report.state, PublishState::Done);
        assert_eq!(backend.calls("commit"), 3);
        Ok(())
    }

    #[test]
    fn test_push_gives_up_after_three_attempts() {
        let fixture = Fixture::new();
        let backend = FakeBackend::default();
        backend.branches.borrow_mut().insert("1_21".to_string());
        for _ in 0..3 {
            backend
                .push_results
                .borrow_mut()
                .push_back(Err(MirrorError::publish_transient("push", "connection reset")));
        }
        let overlay = LinkOverlay::new();
        let orchestrator = PublishOrchestrator::new(
            &backend,
            &overlay,
            &fixture.markers,
            fixture.settings(HistoryMode::Additive),
        );

        match orchestrator.publish(&fixture.request, &NoProgress) {
            Err(MirrorError::PublishTransient {
                operation,
                attempts,
                ..
            }) => {
                assert_eq!(operation, "push");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
        assert_eq!(backend.calls("push"), 3);
        assert!(overlay.active().is_empty());
        assert!(!orchestrator.working_copy("1.21").exists());
        assert!(!fixture
            .markers
            .exists(Stage::Publish, &fixture.request.manifest_digest));
    }

    #[test]
    fn test_terminal_failure_is_not_retried() {
        let fixture = Fixture::new();
        let backend = FakeBackend::default();
        backend.branches.borrow_mut().insert("1_21".to_string());
        backend
            .push_results
            .borrow_mut()
            .push_back(Err(MirrorError::publish_terminal("push", "Authentication failed")));
        let overlay = LinkOverlay::new();
        let orchestrator = PublishOrchestrator::new(
            &backend,
            &overlay,
            &fixture.markers,
            fixture.settings(HistoryMode::Additive),
        );

        let result = orchestrator.publish(&fixture.request, &NoProgress);
        assert!(matches!(result, Err(MirrorError::PublishTerminal { .. })));
        assert_eq!(backend.calls("push"), 1);
    }

    #[test]
    fn test_skip_rules() -> Result<()> {
        let fixture = Fixture::new();
        let backend = FakeBackend::default();
        let overlay = LinkOverlay::new();
        let orchestrator = PublishOrchestrator::new(
            &backend,
            &overlay,
            &fixture.markers,
            fixture.settings(HistoryMode::Additive),
        );

        let undownloaded = PublishRequest {
            version_id: "1.20".to_string(),
            manifest_digest: HashAlgorithm::Sha1.digest_bytes(b"other"),
            asset_index_digest: None,
        };
        assert!(orchestrator.publish(&undownloaded, &NoProgress)?.skipped);

        // Publish marker newer than the download marker.
        let download = fixture
            .markers
            .path(Stage::Download, &fixture.request.manifest_digest);
        fs::File::options()
            .write(true)
            .open(&download)?
            .set_modified(std::time::SystemTime::now() - Duration::from_secs(60))?;
        fixture
            .markers
            .mark(Stage::Publish, &fixture.request.manifest_digest)?;
        assert!(orchestrator.publish(&fixture.request, &NoProgress)?.skipped);
        assert!(backend.calls.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn test_missing_output_tree_fails_and_cleans_up() {
        let fixture = Fixture::new();
        fs::remove_dir_all(fixture.temp.path().join("out/1.21")).unwrap();
        let backend = FakeBackend::default();
        let overlay = LinkOverlay::new();
        let orchestrator = PublishOrchestrator::new(
            &backend,
            &overlay,
            &fixture.markers,
            fixture.settings(HistoryMode::Additive),
        );

        let result = orchestrator.publish(&fixture.request, &NoProgress);
        assert!(matches!(result, Err(MirrorError::NotFound { .. })));
        assert!(!orchestrator.working_copy("1.21").exists());
    }
}
