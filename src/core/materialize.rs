//! Projects cache entries into a per-version output tree.
//!
//! Files are hard-linked from the cache (copied when the link fails, e.g.
//! across devices), never moved, so a blob stays available to every other
//! version that shares it. Cache blobs are never opened for writing here.

use crate::core::archive::ArchiveEntryResult;
use crate::core::cache::CacheEntry;
use crate::core::error::{MirrorError, Result};
use crate::core::restore::RestoreRecord;
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

static LANG_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_-]+/lang/").expect("valid lang regex"));

/// Locale files live under `<namespace>/lang/`, both inside the client
/// archive (`assets/<namespace>/lang/..`) and in the asset index.
pub fn is_lang_path(path: &str) -> bool {
    LANG_PATH.is_match(path)
        || path
            .strip_prefix("assets/")
            .is_some_and(|rest| LANG_PATH.is_match(rest))
}

/// True for a non-empty relative path made only of plain names: no root,
/// no drive prefix, no `.` or `..`.
pub fn is_contained_path(path: &Path) -> bool {
    let mut components = path.components().peekable();
    components.peek().is_some() && components.all(|c| matches!(c, Component::Normal(_)))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeOptions {
    pub include_lang: bool,
    pub record_restore: bool,
}

/// One node of the output tree, relative to the version directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterialItem {
    File { path: String, entry: CacheEntry },
    Directory { path: String },
}

impl MaterialItem {
    /// Asset-index objects land under `assets/`.
    pub fn asset(asset_path: &str, entry: CacheEntry) -> Self {
        Self::File {
            path: format!("assets/{asset_path}"),
            entry,
        }
    }

    pub fn from_archive(result: ArchiveEntryResult) -> Option<Self> {
        match result {
            ArchiveEntryResult::Skipped { .. } => None,
            ArchiveEntryResult::Directory { path } => Some(Self::Directory { path }),
            ArchiveEntryResult::Stored { path, entry, .. } => Some(Self::File { path, entry }),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::File { path, .. } | Self::Directory { path } => path,
        }
    }
}

pub struct Materializer {
    cache_root: PathBuf,
    options: MaterializeOptions,
}

impl Materializer {
    pub fn new(cache_root: impl Into<PathBuf>, options: MaterializeOptions) -> Self {
        Self {
            cache_root: cache_root.into(),
            options,
        }
    }

    pub fn version_dir(destination_root: &Path, version_id: &str) -> PathBuf {
        destination_root.join(version_id)
    }

    /// Link every item under `<destination_root>/<version_id>`. The returned
    /// record is empty unless `record_restore` is set. An item whose path
    /// would leave the version directory fails with `UnsafePath`.
    pub fn materialize(
        &self,
        version_id: &str,
        items: impl IntoIterator<Item = MaterialItem>,
        destination_root: &Path,
        mut on_item: impl FnMut(),
    ) -> Result<RestoreRecord> {
        let version_dir = Self::version_dir(destination_root, version_id);
        fs::create_dir_all(&version_dir)?;

        let mut record = RestoreRecord::new();
        let mut linked = 0usize;
        let mut filtered = 0usize;
        for item in items {
            on_item();
            if !is_contained_path(Path::new(item.path())) {
                return Err(MirrorError::UnsafePath {
                    path: item.path().to_string(),
                });
            }
            if !self.options.include_lang && is_lang_path(item.path()) {
                filtered += 1;
                continue;
            }
            match item {
                MaterialItem::Directory { path } => {
                    fs::create_dir_all(version_dir.join(&path))?;
                }
                MaterialItem::File { path, entry } => {
                    link_or_copy(&entry.path, &version_dir.join(&path))?;
                    linked += 1;
                    if self.options.record_restore {
                        record.push(self.cache_relative(&entry.path), PathBuf::from(path));
                    }
                }
            }
        }

        log::debug!("Materialized {version_id}: {linked} files linked, {filtered} lang entries filtered");
        Ok(record)
    }

    fn cache_relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.cache_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Replace whatever is at `destination` with a hard link to `source`,
/// falling back to a byte copy.
pub fn link_or_copy(source: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::symlink_metadata(destination) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(destination)?,
        Ok(_) => fs::remove_file(destination)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if let Err(e) = fs::hard_link(source, destination) {
        log::debug!(
            "Hard link {} -> {} failed ({e}), copying",
            source.display(),
            destination.display()
        );
        fs::copy(source, destination)?;
    }
    Ok(())
}
