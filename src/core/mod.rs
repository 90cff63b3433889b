//! Core functionality for asset-mirror.
//!
//! Leaf-first: digests and the content-addressed cache, manifest
//! resolution, archive extraction, materialization, completion markers,
//! and publishing to per-version branches.

pub mod archive;
pub mod cache;
pub mod config;
pub mod digest;
pub mod dirs;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod markers;
pub mod materialize;
pub mod output;
pub mod overlay;
pub mod pipeline;
pub mod progress;
pub mod publish;
pub mod restore;
pub mod vcs;

// === Error handling ===
pub use error::{MirrorError, Result};

// === Content-addressed storage ===
pub use cache::{CacheEntry, ContentCache, FetchDescriptor};
pub use digest::{Digest, HashAlgorithm};
pub use fetch::{Fetcher, HttpFetcher};

// === Upstream documents ===
pub use manifest::{
    AssetIndex, ManifestResolver, ResolverSettings, VersionList, VersionListEntry,
    VersionManifest, VersionType,
};

// === Extraction and output trees ===
pub use archive::{ArchiveEntryResult, ArchiveExtractor, ArchiveSummary, InclusionPolicy};
pub use materialize::{MaterialItem, MaterializeOptions, Materializer};
pub use restore::RestoreRecord;

// === Pipeline state ===
pub use markers::{CompletionMarkers, Stage};
pub use pipeline::{DownloadPipeline, DownloadSettings, FailurePolicy, RunSummary, StepOutcome};
pub use progress::{ConsoleProgress, NoProgress, ProgressObserver, ProgressTicker};

// === Publishing ===
pub use overlay::{BindfsOverlay, LinkOverlay, MountGuard, OverlayMount};
pub use publish::{HistoryMode, PublishOrchestrator, PublishReport, PublishRequest, PublishState};
pub use vcs::{CommitOutcome, GitCliBackend, GitIdentity, PushOutcome, VersionControlBackend};

// === Configuration ===
pub use config::SyncConfig;

// === Output formatting ===
pub use output::{
    print_error, print_info, print_run_summary, print_section_header, print_success,
    print_version_start, print_warning,
};
