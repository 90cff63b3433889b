//! Content-addressed blob cache.
//!
//! Blobs are stored under `<root>/<algo>/<hash[0:2]>/<hash[2:]>` and are
//! immutable once written. Bytes are verified against their expected digest
//! before anything touches the disk, so a file present in the cache always
//! matches its name. Hits are served without re-hashing.
//!
//! Concurrent requests for the same digest are serialized through a per-key
//! lock: the first caller fetches, later callers wait and then observe the
//! persisted entry.

use crate::core::digest::{Digest, HashAlgorithm};
use crate::core::error::{MirrorError, Result};
use crate::core::fetch::Fetcher;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// A verified blob in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub digest: Digest,
    pub size: u64,
    pub path: PathBuf,
}

/// Where to fetch a blob from and what it must hash to.
#[derive(Debug, Clone)]
pub struct FetchDescriptor {
    pub url: String,
    pub digest: Digest,
}

impl FetchDescriptor {
    pub fn new(url: impl Into<String>, digest: Digest) -> Self {
        Self {
            url: url.into(),
            digest,
        }
    }
}

pub struct ContentCache {
    root: PathBuf,
    fetcher: Arc<dyn Fetcher>,
    in_flight: Mutex<HashMap<Digest, Arc<Mutex<()>>>>,
}

impl ContentCache {
    pub fn new(root: impl Into<PathBuf>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            root: root.into(),
            fetcher,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, digest: &Digest) -> PathBuf {
        self.root
            .join(digest.algorithm().name())
            .join(digest.prefix())
            .join(digest.rest())
    }

    pub fn get(&self, digest: &Digest) -> Option<CacheEntry> {
        let path = self.path_for(digest);
        let metadata = fs::metadata(&path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        Some(CacheEntry {
            digest: digest.clone(),
            size: metadata.len(),
            path,
        })
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.get(digest).is_some()
    }

    /// Return the cached entry for `descriptor.digest`, fetching and
    /// verifying it first if it is not present.
    pub fn fetch_or_get(&self, descriptor: &FetchDescriptor) -> Result<CacheEntry> {
        if let Some(entry) = self.get(&descriptor.digest) {
            log::debug!("Cache hit for {}", descriptor.digest);
            return Ok(entry);
        }

        let key_lock = self.key_lock(&descriptor.digest);
        let result = {
            let _guard = key_lock.lock().unwrap_or_else(PoisonError::into_inner);
            // Another caller may have finished the transfer while we waited.
            match self.get(&descriptor.digest) {
                Some(entry) => Ok(entry),
                None => self.fetch_verified(descriptor),
            }
        };
        drop(key_lock);
        self.release_key(&descriptor.digest);
        result
    }

    /// Hash `bytes` and store them if no entry exists for that hash yet.
    pub fn insert_bytes(&self, algorithm: HashAlgorithm, bytes: &[u8]) -> Result<(CacheEntry, bool)> {
        let digest = algorithm.digest_bytes(bytes);
        if let Some(entry) = self.get(&digest) {
            return Ok((entry, false));
        }

        let key_lock = self.key_lock(&digest);
        let result = {
            let _guard = key_lock.lock().unwrap_or_else(PoisonError::into_inner);
            match self.get(&digest) {
                Some(entry) => Ok((entry, false)),
                None => self.persist(&digest, bytes).map(|entry| (entry, true)),
            }
        };
        drop(key_lock);
        self.release_key(&digest);
        result
    }

    /// Re-hash an entry from disk. Reads never rely on this; it backs the
    /// `check` command and tests.
    pub fn verify(&self, entry: &CacheEntry) -> Result<()> {
        let file = fs::File::open(&entry.path)?;
        let actual = entry
            .digest
            .algorithm()
            .digest_reader(io::BufReader::new(file))?;
        if actual != entry.digest {
            return Err(MirrorError::integrity(
                entry.path.display().to_string(),
                entry.digest.as_hex(),
                actual.as_hex(),
            ));
        }
        Ok(())
    }

    /// Drop a blob from the cache. Only archive blobs are ever evicted, and
    /// only when archive retention is disabled.
    pub fn evict(&self, digest: &Digest) -> Result<bool> {
        match fs::remove_file(self.path_for(digest)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Every blob stored under `algorithm`. Files whose names do not form a
    /// valid digest (leftover temp files) are ignored.
    pub fn entries(&self, algorithm: HashAlgorithm) -> Result<Vec<CacheEntry>> {
        let base = self.root.join(algorithm.name());
        if !base.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for shard in fs::read_dir(&base)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            let prefix = shard.file_name().to_string_lossy().into_owned();
            for blob in fs::read_dir(shard.path())? {
                let blob = blob?;
                let rest = blob.file_name().to_string_lossy().into_owned();
                let Ok(digest) = Digest::parse(algorithm, &format!("{prefix}{rest}")) else {
                    continue;
                };
                let metadata = blob.metadata()?;
                if metadata.is_file() {
                    entries.push(CacheEntry {
                        digest,
                        size: metadata.len(),
                        path: blob.path(),
                    });
                }
            }
        }
        entries.sort_by(|a, b| a.digest.as_hex().cmp(b.digest.as_hex()));
        Ok(entries)
    }

    fn fetch_verified(&self, descriptor: &FetchDescriptor) -> Result<CacheEntry> {
        log::debug!("Cache miss for {}, fetching {}", descriptor.digest, descriptor.url);
        let bytes = self.fetcher.get(&descriptor.url)?;

        let actual = descriptor.digest.algorithm().digest_bytes(&bytes);
        if actual != descriptor.digest {
            log::error!(
                "Rejecting {}: expected {}, got {}",
                descriptor.url,
                descriptor.digest,
                actual
            );
            return Err(MirrorError::integrity(
                &descriptor.url,
                descriptor.digest.as_hex(),
                actual.as_hex(),
            ));
        }

        self.persist(&descriptor.digest, &bytes)
    }

    fn persist(&self, digest: &Digest, bytes: &[u8]) -> Result<CacheEntry> {
        let path = self.path_for(digest);
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::other("cache path has no parent"))?;
        fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| MirrorError::Io(e.error))?;

        log::debug!("Stored {} ({} bytes)", digest, bytes.len());
        Ok(CacheEntry {
            digest: digest.clone(),
            size: bytes.len() as u64,
            path,
        })
    }

    fn key_lock(&self, digest: &Digest) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight
            .entry(digest.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_key(&self, digest: &Digest) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = in_flight.get(digest) {
            // Only the map itself holds it: nobody else is waiting.
            if Arc::strong_count(lock) == 1 {
                in_flight.remove(digest);
            }
        }
    }
}
