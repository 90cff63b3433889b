//! Per-version download pipeline and run bookkeeping.
//!
//! Versions are processed strictly one after another. For each one:
//! client archive -> extraction -> asset index -> asset objects -> output
//! tree -> restore ledger -> download marker. The marker is written last, so
//! a crash anywhere before it means the version is redone on the next run.

use crate::core::archive::{ArchiveExtractor, InclusionPolicy};
use crate::core::error::{MirrorError, Result};
use crate::core::manifest::{canonical_version_id, ManifestResolver, VersionList, VersionListEntry};
use crate::core::markers::{CompletionMarkers, Stage};
use crate::core::materialize::{is_lang_path, MaterialItem, MaterializeOptions, Materializer};
use crate::core::progress::ProgressObserver;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const ARCHIVE_REPORT_EVERY: usize = 200;
const ASSET_REPORT_EVERY: usize = 100;

/// What happens to the rest of a run once a version fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    #[default]
    BestEffort,
    FailFast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Skipped,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub completed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, MirrorError)>,
    /// Set when fail-fast stopped the run early.
    pub halted: bool,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Anything a run can be keyed by.
pub trait VersionKey {
    fn version_id(&self) -> &str;
}

impl VersionKey for VersionListEntry {
    fn version_id(&self) -> &str {
        &self.id
    }
}

impl VersionKey for String {
    fn version_id(&self) -> &str {
        self
    }
}

impl<T: VersionKey + ?Sized> VersionKey for &T {
    fn version_id(&self) -> &str {
        (**self).version_id()
    }
}

/// Drive `step` over `versions` in order, applying the failure policy.
pub fn run_versions<T: VersionKey>(
    versions: impl IntoIterator<Item = T>,
    policy: FailurePolicy,
    mut step: impl FnMut(&T) -> Result<StepOutcome>,
) -> RunSummary {
    let mut summary = RunSummary::default();
    for version in versions {
        let id = version.version_id().to_string();
        match step(&version) {
            Ok(StepOutcome::Completed) => summary.completed.push(id),
            Ok(StepOutcome::Skipped) => summary.skipped.push(id),
            Err(e) => {
                log::error!("Version {id} failed: {e}");
                summary.failed.push((id, e));
                if policy == FailurePolicy::FailFast {
                    summary.halted = true;
                    break;
                }
            }
        }
    }
    summary
}

/// All versions, or just `only` (matched after id normalization).
pub fn select_versions(list: &VersionList, only: Option<&str>) -> Result<Vec<VersionListEntry>> {
    match only {
        None => Ok(list.versions.clone()),
        Some(id) => {
            let canonical = canonical_version_id(id);
            list.versions
                .iter()
                .find(|v| v.id == id || v.id == canonical)
                .cloned()
                .map(|v| vec![v])
                .ok_or_else(|| MirrorError::not_found("Version", id))
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub output_root: PathBuf,
    pub restore_dir: PathBuf,
    pub asset_base_url: String,
    pub force: bool,
    pub include_lang: bool,
    pub create_restore: bool,
    pub keep_archives: bool,
    pub staleness: Duration,
}

/// Task-level progress: `<label> (<task>/<tasks>)` plus a sub-counter.
struct Tasks<'p> {
    observer: &'p dyn ProgressObserver,
    label: &'static str,
    done: usize,
    total: usize,
}

impl Tasks<'_> {
    fn begin(&mut self, label: &'static str) {
        if !self.label.is_empty() {
            self.done += 1;
        }
        self.label = label;
        self.report(0, None);
    }

    fn report(&self, done: usize, total: Option<usize>) {
        let stage = format!("{} ({}/{})", self.label, self.done, self.total);
        self.observer.on_progress(&stage, done, total);
    }
}

pub struct DownloadPipeline<'a> {
    resolver: &'a ManifestResolver<'a>,
    markers: &'a CompletionMarkers,
    policy: &'a InclusionPolicy,
    materializer: Materializer,
    settings: DownloadSettings,
}

impl<'a> DownloadPipeline<'a> {
    pub fn new(
        resolver: &'a ManifestResolver<'a>,
        markers: &'a CompletionMarkers,
        policy: &'a InclusionPolicy,
        settings: DownloadSettings,
    ) -> Self {
        let materializer = Materializer::new(
            resolver.cache().root(),
            MaterializeOptions {
                include_lang: settings.include_lang,
                record_restore: settings.create_restore,
            },
        );
        Self {
            resolver,
            markers,
            policy,
            materializer,
            settings,
        }
    }

    pub fn restore_path(&self, version_id: &str) -> PathBuf {
        self.settings.restore_dir.join(version_id)
    }

    pub fn download_version(
        &self,
        version: &VersionListEntry,
        progress: &dyn ProgressObserver,
    ) -> Result<StepOutcome> {
        let manifest_digest = version.manifest_digest()?;
        if self
            .markers
            .should_skip_download(&manifest_digest, self.settings.force, self.settings.staleness)
        {
            log::debug!("Skipping download of {}: already complete", version.id);
            return Ok(StepOutcome::Skipped);
        }

        log::info!("Downloading {} ({manifest_digest})", version.id);
        let cache = self.resolver.cache();
        let mut tasks = Tasks {
            observer: progress,
            label: "",
            done: 0,
            total: 5 + usize::from(self.settings.create_restore),
        };
        let mut items = Vec::new();

        tasks.begin("downloading client jar");
        let manifest = self.resolver.resolve_version(&version.id)?;
        let jar_descriptor = manifest.download("client")?;
        let jar = cache.fetch_or_get(&jar_descriptor)?;

        tasks.begin("extracting client jar");
        let extraction = ArchiveExtractor::new(cache).open(&jar.path, self.policy)?;
        let entry_count = extraction.summary().entry_count;
        tasks.report(0, Some(entry_count));
        for (index, result) in extraction.enumerate() {
            items.extend(MaterialItem::from_archive(result?));
            if (index + 1) % ARCHIVE_REPORT_EVERY == 0 {
                tasks.report(index + 1, Some(entry_count));
            }
        }
        tasks.report(entry_count, Some(entry_count));

        tasks.begin("downloading asset index");
        let asset_index = self.resolver.resolve_asset_index(&version.id)?;

        tasks.begin("downloading assets");
        let asset_count = asset_index.objects.len();
        for (index, asset_path) in asset_index.objects.keys().enumerate() {
            if !self.settings.include_lang && is_lang_path(asset_path) {
                continue;
            }
            let descriptor = asset_index.descriptor(&self.settings.asset_base_url, asset_path)?;
            let entry = cache.fetch_or_get(&descriptor)?;
            items.push(MaterialItem::asset(asset_path, entry));
            if (index + 1) % ASSET_REPORT_EVERY == 0 {
                tasks.report(index + 1, Some(asset_count));
            }
        }
        tasks.report(asset_count, Some(asset_count));

        tasks.begin("linking files");
        let item_count = items.len();
        let mut linked = 0;
        let record = self.materializer.materialize(
            &version.id,
            items,
            &self.settings.output_root,
            || {
                linked += 1;
                if linked % ASSET_REPORT_EVERY == 0 {
                    tasks.report(linked, Some(item_count));
                }
            },
        )?;

        if self.settings.create_restore {
            tasks.begin("writing restore file");
            record.write(&self.restore_path(&version.id))?;
        }

        tasks.begin("finished");
        self.markers.mark(Stage::Download, &manifest_digest)?;

        if !self.settings.keep_archives && cache.evict(&jar_descriptor.digest)? {
            log::debug!("Dropped client archive {} for {}", jar_descriptor.digest, version.id);
        }
        Ok(StepOutcome::Completed)
    }
}
