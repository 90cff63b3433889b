//! Asset Mirror - mirrors game-version artifacts into a verified,
//! content-addressed cache and publishes one branch per version.
//!
//! # Public API
//! The main public interface is re-exported from the [`core`] module:
//! - Content-addressed cache and fetchers
//! - Manifest resolution and normalization
//! - Archive extraction, materialization and restore ledgers
//! - The publish state machine and its git/overlay backends
//! - Error handling and result types

pub mod commands;
pub mod core;

pub use core::{
    // Storage
    CacheEntry,
    CompletionMarkers,
    ContentCache,
    Digest,
    // Pipeline
    DownloadPipeline,
    FailurePolicy,
    FetchDescriptor,
    HashAlgorithm,
    InclusionPolicy,
    ManifestResolver,
    // Error handling
    MirrorError,
    // Publishing
    PublishOrchestrator,
    PublishState,
    RestoreRecord,
    Result,
    RunSummary,
    // Configuration
    SyncConfig,
};
