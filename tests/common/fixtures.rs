//! Scratch workspaces and predefined scenarios
//!
//! A [`MirrorWorkspace`] owns a temporary directory with every root a
//! [`SyncConfig`] points at, so tests can seed output trees, cache blobs and
//! restore ledgers and then drive the library or the binary against it.

#![allow(dead_code)]

use asset_mirror::core::error::Result;
use asset_mirror::core::{
    CompletionMarkers, Digest, HashAlgorithm, LinkOverlay, RestoreRecord, Stage, SyncConfig,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const MANIFEST_SHA1: &str = "0123456789abcdef0123456789abcdef01234567";

pub struct MirrorWorkspace {
    pub temp_dir: TempDir,
    pub config: SyncConfig,
}

impl MirrorWorkspace {
    /// A workspace whose config publishes to `remote_url`, if given, with
    /// link-based overlays so no FUSE tooling is needed.
    pub fn new(remote_url: Option<&str>) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        let config = SyncConfig {
            cache_root: root.join("cache"),
            output_root: root.join("out"),
            git_root: root.join("git"),
            restore_root: root.join("restore"),
            remote_url: remote_url.map(str::to_string),
            overlay_mode: asset_mirror::core::config::OverlayMode::Link,
            publish_attempts: 1,
            git_name: "Test User".to_string(),
            git_email: "test@example.com".to_string(),
            ..SyncConfig::default()
        };
        Ok(Self { temp_dir, config })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Serialize the config next to the workspace roots for `--config`.
    pub fn write_config(&self) -> Result<PathBuf> {
        let path = self.path().join("config.json");
        fs::write(&path, serde_json::to_string_pretty(&self.config)?)?;
        Ok(path)
    }

    pub fn output_dir(&self, version_id: &str) -> PathBuf {
        self.config.output_root.join(version_id)
    }

    /// Replace the materialized tree of `version_id` with `files`.
    pub fn write_output_tree(&self, version_id: &str, files: &[(&str, &str)]) -> Result<()> {
        let dir = self.output_dir(version_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        for (path, content) in files {
            let target = dir.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(target, content)?;
        }
        Ok(())
    }

    pub fn markers(&self) -> CompletionMarkers {
        CompletionMarkers::new(&self.config.cache_root)
    }

    pub fn overlay(&self) -> LinkOverlay {
        LinkOverlay::new()
    }

    /// Record a (re)download of the fixture manifest.
    pub fn mark_downloaded(&self) -> Result<Digest> {
        let digest = Digest::sha1(MANIFEST_SHA1)?;
        self.markers().mark(Stage::Download, &digest)?;
        Ok(digest)
    }

    /// Store `bytes` in the cache layout, returning the cache-relative path.
    pub fn seed_cache_blob(&self, bytes: &[u8]) -> Result<PathBuf> {
        let digest = HashAlgorithm::Sha1.digest_bytes(bytes);
        let relative = PathBuf::from(digest.algorithm().name())
            .join(digest.prefix())
            .join(digest.rest());
        let path = self.config.cache_root.join(&relative);
        fs::create_dir_all(path.parent().expect("cache path has a parent"))?;
        fs::write(&path, bytes)?;
        Ok(relative)
    }

    /// Write a restore ledger mapping each `(content, output path)` pair.
    pub fn write_ledger(&self, version_id: &str, files: &[(&[u8], &str)]) -> Result<()> {
        let mut record = RestoreRecord::new();
        for (content, output) in files {
            let cached = self.seed_cache_blob(content)?;
            record.push(cached, PathBuf::from(output));
        }
        record.write(&self.config.restore_root.join(version_id))
    }
}
