//! Streaming extraction of client archives into the cache.
//!
//! [`ArchiveExtractor::open`] reads only the central directory, so callers can
//! learn the entry count before any entry is decompressed. The returned
//! [`Extraction`] is an iterator yielding one [`ArchiveEntryResult`] per
//! entry, in archive order. Excluded entries are reported as
//! [`ArchiveEntryResult::Skipped`] rather than dropped so progress counters
//! stay exact. Entries whose names are absolute or climb out with `..` are
//! skipped the same way, so nothing lands outside the version directory.
//!
//! The central directory is keyed by name: when an archive lists the same
//! path twice, only the last entry survives, both in the entry count and in
//! the yielded results.

use crate::core::cache::{CacheEntry, ContentCache};
use crate::core::digest::HashAlgorithm;
use crate::core::error::{MirrorError, Result};
use crate::core::materialize::is_contained_path;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Decides which archive paths are worth keeping.
pub struct InclusionPolicy {
    name: &'static str,
    predicate: Box<dyn Fn(&str) -> bool + Send + Sync>,
}

impl InclusionPolicy {
    pub fn new(name: &'static str, predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name,
            predicate: Box::new(predicate),
        }
    }

    /// Resource trees only: `assets/...` and `data/...`.
    pub fn resources() -> Self {
        Self::new("resources", |path| {
            path.starts_with("assets/") || path.starts_with("data/")
        })
    }

    /// Everything except signatures/metadata and compiled classes.
    pub fn non_code() -> Self {
        Self::new("non-code", |path| {
            !path.starts_with("META-INF/") && !path.ends_with(".class")
        })
    }

    pub fn everything() -> Self {
        Self::new("everything", |_| true)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn includes(&self, path: &str) -> bool {
        (self.predicate)(path)
    }
}

impl fmt::Debug for InclusionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InclusionPolicy")
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entry_count: usize,
}

/// Outcome for one archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEntryResult {
    /// Filtered out by the inclusion policy.
    Skipped { path: String },
    /// Directory entry; never hashed, only recreated downstream.
    Directory { path: String },
    /// File entry, present in the cache. `created` is false when the blob
    /// was already cached.
    Stored {
        path: String,
        entry: CacheEntry,
        created: bool,
    },
}

impl ArchiveEntryResult {
    pub fn path(&self) -> &str {
        match self {
            Self::Skipped { path } | Self::Directory { path } | Self::Stored { path, .. } => path,
        }
    }
}

pub struct ArchiveExtractor<'a> {
    cache: &'a ContentCache,
    algorithm: HashAlgorithm,
}

impl<'a> ArchiveExtractor<'a> {
    pub fn new(cache: &'a ContentCache) -> Self {
        Self {
            cache,
            algorithm: HashAlgorithm::Sha1,
        }
    }

    pub fn open<'p>(&self, archive: &Path, policy: &'p InclusionPolicy) -> Result<Extraction<'a, 'p>> {
        let file = File::open(archive)?;
        let zip = ZipArchive::new(file).map_err(|e| MirrorError::corrupt_archive(archive, e))?;
        log::debug!(
            "Opened archive {} with {} entries (policy: {})",
            archive.display(),
            zip.len(),
            policy.name()
        );
        Ok(Extraction {
            cache: self.cache,
            algorithm: self.algorithm,
            archive: archive.to_path_buf(),
            zip,
            policy,
            next: 0,
        })
    }
}

pub struct Extraction<'a, 'p> {
    cache: &'a ContentCache,
    algorithm: HashAlgorithm,
    archive: PathBuf,
    zip: ZipArchive<File>,
    policy: &'p InclusionPolicy,
    next: usize,
}

impl Extraction<'_, '_> {
    pub fn summary(&self) -> ArchiveSummary {
        ArchiveSummary {
            entry_count: self.zip.len(),
        }
    }

    fn extract(&mut self, index: usize) -> Result<ArchiveEntryResult> {
        let mut file = self
            .zip
            .by_index(index)
            .map_err(|e| MirrorError::corrupt_archive(&self.archive, e))?;
        let path = file.name().to_string();

        if file.enclosed_name().is_none() || !is_contained_path(Path::new(&path)) {
            log::warn!(
                "Skipping unsafe entry '{path}' in {}",
                self.archive.display()
            );
            return Ok(ArchiveEntryResult::Skipped { path });
        }
        if !self.policy.includes(&path) {
            return Ok(ArchiveEntryResult::Skipped { path });
        }
        if file.is_dir() {
            return Ok(ArchiveEntryResult::Directory {
                path: path.trim_end_matches('/').to_string(),
            });
        }

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(|e| {
            MirrorError::corrupt_archive(&self.archive, zip::result::ZipError::Io(e))
        })?;
        let (entry, created) = self.cache.insert_bytes(self.algorithm, &bytes)?;
        Ok(ArchiveEntryResult::Stored {
            path,
            entry,
            created,
        })
    }
}

impl Iterator for Extraction<'_, '_> {
    type Item = Result<ArchiveEntryResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.zip.len() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.extract(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.zip.len() - self.next;
        (remaining, Some(remaining))
    }
}
