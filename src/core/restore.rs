//! Restore ledgers.
//!
//! One gzip-compressed ledger per version records every
//! `cachePath<NUL>outputRelativePath` pair written during materialization.
//! Cache paths are stored relative to the cache root. Replaying a ledger
//! rebuilds the output tree from the cache alone.

use crate::core::error::{MirrorError, Result};
use crate::core::materialize::{is_contained_path, link_or_copy};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreRecord {
    entries: Vec<(PathBuf, PathBuf)>,
}

impl RestoreRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cache_relative: PathBuf, output_relative: PathBuf) {
        self.entries.push((cache_relative, output_relative));
    }

    pub fn entries(&self) -> &[(PathBuf, PathBuf)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        for (cache, output) in &self.entries {
            out.push_str(&cache.to_string_lossy());
            out.push('\0');
            out.push_str(&output.to_string_lossy());
            out.push('\n');
        }
        out.into_bytes()
    }

    /// Parse ledger text. Both paths on every line must be plain relative
    /// paths; anything rooted or containing `..` is malformed.
    pub fn decode(bytes: &[u8], source: &Path) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| MirrorError::MalformedLedger {
                path: source.to_path_buf(),
                line: 0,
            })?;
        let mut record = Self::new();
        for (number, line) in text.split('\n').enumerate() {
            if line.is_empty() {
                continue;
            }
            let malformed = || MirrorError::MalformedLedger {
                path: source.to_path_buf(),
                line: number + 1,
            };
            let (cache, output) = line.split_once('\0').ok_or_else(malformed)?;
            let (cache, output) = (PathBuf::from(cache), PathBuf::from(output));
            if !is_contained_path(&cache) || !is_contained_path(&output) {
                return Err(malformed());
            }
            record.push(cache, output);
        }
        Ok(record)
    }

    /// Compress and persist atomically, replacing any previous ledger.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(2));
        encoder.write_all(&self.encode())?;
        let compressed = encoder.finish()?;
        crate::core::manifest::write_atomic(path, &compressed)?;
        log::debug!("Wrote restore ledger {} ({} entries)", path.display(), self.len());
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let mut decoder = GzDecoder::new(fs::File::open(path)?);
        let mut bytes = Vec::new();
        decoder.read_to_end(&mut bytes)?;
        Self::decode(&bytes, path)
    }

    /// Recreate every recorded output under `output_dir`. Returns the number
    /// of files linked. A missing cache blob is an error: restoring never
    /// goes to the network.
    pub fn replay(
        &self,
        cache_root: &Path,
        output_dir: &Path,
        mut on_entry: impl FnMut(usize),
    ) -> Result<usize> {
        for (done, (cache, output)) in self.entries.iter().enumerate() {
            let source = cache_root.join(cache);
            if !source.is_file() {
                return Err(MirrorError::not_found(
                    "Cache blob",
                    source.display().to_string(),
                ));
            }
            link_or_copy(&source, &output_dir.join(output))?;
            on_entry(done + 1);
        }
        Ok(self.entries.len())
    }
}
