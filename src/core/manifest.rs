//! Version list, per-version manifests and asset indexes.
//!
//! The [`ManifestResolver`] is the only component that knows where upstream
//! documents live. Every hash-addressed document goes through the
//! [`ContentCache`]; the top-level version list, which has no published hash,
//! is kept on disk next to the cache and reused within a freshness window.
//!
//! # Normalization
//! After an optional local overlay is deep-merged over the fetched list,
//! pre-release identifiers are rewritten to `<major>-pre<n>` and version
//! types are re-derived from their identifiers where a pattern applies.

use crate::core::cache::{ContentCache, FetchDescriptor};
use crate::core::digest::Digest;
use crate::core::error::{MirrorError, Result};
use crate::core::fetch::Fetcher;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

const VERSION_LIST_FILE: &str = "version_manifest_v2.json";

static RELEASE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+(\.\d+)?$").expect("valid regex"));
static SNAPSHOT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+w\d+[a-z]$").expect("valid regex"));
static PRE_RELEASE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+(\.\d+)?-(pre|rc)\d+$").expect("valid regex"));
static LEGACY_PRE_RELEASE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)(\d+\.\d+(?:\.\d+)?)[ _-]*pre(?:-?release)?[ _-]*(\d+)$").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionType {
    Release,
    Snapshot,
    OldSnapshot,
    OldBeta,
    OldAlpha,
    Experiment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Latest {
    pub release: String,
    pub snapshot: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionListEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: VersionType,
    pub url: String,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    pub release_time: DateTime<Utc>,
    pub sha1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance_level: Option<u8>,
}

impl VersionListEntry {
    /// The manifest hash keys completion markers and cache lookups.
    pub fn manifest_digest(&self) -> Result<Digest> {
        Digest::sha1(&self.sha1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionList {
    pub latest: Latest,
    pub versions: Vec<VersionListEntry>,
}

impl VersionList {
    pub fn find(&self, id: &str) -> Option<&VersionListEntry> {
        self.versions.iter().find(|v| v.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Download {
    pub sha1: String,
    pub size: u64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryArtifact {
    #[serde(default)]
    pub path: Option<String>,
    pub sha1: String,
    pub size: u64,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibraryDownloads {
    #[serde(default)]
    pub artifact: Option<LibraryArtifact>,
    #[serde(default)]
    pub classifiers: Option<BTreeMap<String, LibraryArtifact>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
    #[serde(default)]
    pub downloads: LibraryDownloads,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetIndexRef {
    pub id: String,
    pub sha1: String,
    pub size: u64,
    #[serde(default)]
    pub total_size: Option<u64>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionManifest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: VersionType,
    #[serde(default)]
    pub main_class: Option<String>,
    #[serde(default)]
    pub assets: Option<String>,
    pub asset_index: AssetIndexRef,
    #[serde(default)]
    pub downloads: BTreeMap<String, Download>,
    #[serde(default)]
    pub libraries: Vec<Library>,
    #[serde(default)]
    pub release_time: Option<DateTime<Utc>>,
}

impl VersionManifest {
    /// Fetch descriptor for a named download such as `client`.
    pub fn download(&self, name: &str) -> Result<FetchDescriptor> {
        let download = self
            .downloads
            .get(name)
            .ok_or_else(|| MirrorError::not_found("Download", format!("{}:{name}", self.id)))?;
        Ok(FetchDescriptor::new(&download.url, Digest::sha1(&download.sha1)?))
    }

    pub fn asset_index_descriptor(&self) -> Result<FetchDescriptor> {
        Ok(FetchDescriptor::new(
            &self.asset_index.url,
            Digest::sha1(&self.asset_index.sha1)?,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetObject {
    pub hash: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetIndex {
    #[serde(default)]
    pub map_to_resources: Option<bool>,
    #[serde(default, rename = "virtual")]
    pub is_virtual: Option<bool>,
    pub objects: BTreeMap<String, AssetObject>,
}

impl AssetIndex {
    /// Asset objects live at `<base>/<hash[0:2]>/<hash>`.
    pub fn descriptor(&self, asset_base_url: &str, asset_path: &str) -> Result<FetchDescriptor> {
        let object = self
            .objects
            .get(asset_path)
            .ok_or_else(|| MirrorError::not_found("Asset", asset_path))?;
        let digest = Digest::sha1(&object.hash)?;
        let url = format!(
            "{}/{}/{}",
            asset_base_url.trim_end_matches('/'),
            digest.prefix(),
            digest.as_hex()
        );
        Ok(FetchDescriptor::new(url, digest))
    }
}

/// Rewrite legacy pre-release identifiers such as `1.14 Pre-Release 3`.
pub fn canonical_version_id(id: &str) -> String {
    match LEGACY_PRE_RELEASE_ID.captures(id.trim()) {
        Some(caps) => format!("{}-pre{}", &caps[1], &caps[2]),
        None => id.to_string(),
    }
}

/// Type implied by the identifier, if any pattern applies.
pub fn derive_version_type(id: &str) -> Option<VersionType> {
    if RELEASE_ID.is_match(id) {
        Some(VersionType::Release)
    } else if SNAPSHOT_ID.is_match(id) || PRE_RELEASE_ID.is_match(id) {
        Some(VersionType::Snapshot)
    } else {
        None
    }
}

pub fn normalize(list: &mut VersionList) {
    list.latest.release = canonical_version_id(&list.latest.release);
    list.latest.snapshot = canonical_version_id(&list.latest.snapshot);

    for entry in &mut list.versions {
        let id = canonical_version_id(&entry.id);
        if id != entry.id {
            log::debug!("Normalized version id '{}' -> '{id}'", entry.id);
            entry.id = id;
        }
        if let Some(kind) = derive_version_type(&entry.id) {
            if kind != entry.kind {
                log::debug!("Re-tagged {} from {:?} to {kind:?}", entry.id, entry.kind);
                entry.kind = kind;
            }
        }
    }
}

/// Deep-merge `overlay` into `base`. Objects merge key by key; arrays whose
/// elements carry an `id` merge element-wise by id (new ids are appended);
/// anything else is replaced.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(base_items), Value::Array(overlay_items))
            if overlay_items.iter().all(|item| item.get("id").is_some()) =>
        {
            for item in overlay_items {
                let position = base_items
                    .iter()
                    .position(|existing| existing.get("id") == item.get("id"));
                match position {
                    Some(index) => deep_merge(&mut base_items[index], item),
                    None => base_items.push(item),
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

pub struct ResolverSettings {
    pub version_list_url: String,
    pub meta_dir: PathBuf,
    pub overlay_path: Option<PathBuf>,
    pub ttl: Duration,
}

struct Memo<T> {
    fetched_at: Instant,
    value: Arc<T>,
}

/// Resolves upstream documents, memoizing them for the TTL.
pub struct ManifestResolver<'a> {
    cache: &'a ContentCache,
    fetcher: Arc<dyn Fetcher>,
    settings: ResolverSettings,
    version_list: Mutex<Option<Memo<VersionList>>>,
    manifests: Mutex<HashMap<String, Memo<VersionManifest>>>,
    asset_indexes: Mutex<HashMap<Digest, Memo<AssetIndex>>>,
}

impl<'a> ManifestResolver<'a> {
    pub fn new(cache: &'a ContentCache, fetcher: Arc<dyn Fetcher>, settings: ResolverSettings) -> Self {
        Self {
            cache,
            fetcher,
            settings,
            version_list: Mutex::new(None),
            manifests: Mutex::new(HashMap::new()),
            asset_indexes: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &ContentCache {
        self.cache
    }

    pub fn resolve_version_list(&self) -> Result<Arc<VersionList>> {
        let mut memo = self.version_list.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = memo.as_ref() {
            if cached.fetched_at.elapsed() < self.settings.ttl {
                return Ok(cached.value.clone());
            }
        }

        let raw = self.load_version_list_document()?;
        let mut document: Value = serde_json::from_slice(&raw)?;
        if let Some(overlay_path) = &self.settings.overlay_path {
            if overlay_path.exists() {
                log::debug!("Applying overlay {}", overlay_path.display());
                let overlay: Value = serde_json::from_slice(&fs::read(overlay_path)?)?;
                deep_merge(&mut document, overlay);
            }
        }

        let mut list: VersionList = serde_json::from_value(document)?;
        normalize(&mut list);
        let list = Arc::new(list);
        *memo = Some(Memo {
            fetched_at: Instant::now(),
            value: list.clone(),
        });
        Ok(list)
    }

    pub fn resolve_version(&self, id: &str) -> Result<Arc<VersionManifest>> {
        {
            let manifests = self.manifests.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = manifests.get(id) {
                if cached.fetched_at.elapsed() < self.settings.ttl {
                    return Ok(cached.value.clone());
                }
            }
        }

        let list = self.resolve_version_list()?;
        let entry = list
            .find(id)
            .ok_or_else(|| MirrorError::not_found("Version", id))?;
        let descriptor = FetchDescriptor::new(&entry.url, entry.manifest_digest()?);
        let cached = self.cache.fetch_or_get(&descriptor)?;
        let manifest: VersionManifest = serde_json::from_slice(&fs::read(&cached.path)?)?;
        let manifest = Arc::new(manifest);

        self.manifests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id.to_string(),
                Memo {
                    fetched_at: Instant::now(),
                    value: manifest.clone(),
                },
            );
        Ok(manifest)
    }

    pub fn resolve_asset_index(&self, id: &str) -> Result<Arc<AssetIndex>> {
        let manifest = self.resolve_version(id)?;
        let descriptor = manifest.asset_index_descriptor()?;
        {
            let indexes = self.asset_indexes.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = indexes.get(&descriptor.digest) {
                if cached.fetched_at.elapsed() < self.settings.ttl {
                    return Ok(cached.value.clone());
                }
            }
        }

        let cached = self.cache.fetch_or_get(&descriptor)?;
        let index: AssetIndex = serde_json::from_slice(&fs::read(&cached.path)?)?;
        let index = Arc::new(index);
        self.asset_indexes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                descriptor.digest,
                Memo {
                    fetched_at: Instant::now(),
                    value: index.clone(),
                },
            );
        Ok(index)
    }

    fn load_version_list_document(&self) -> Result<Vec<u8>> {
        let path = self.settings.meta_dir.join(VERSION_LIST_FILE);
        if is_fresh(&path, self.settings.ttl) {
            log::debug!("Using version list from {}", path.display());
            return Ok(fs::read(&path)?);
        }

        log::info!("Fetching version list from {}", self.settings.version_list_url);
        let body = self.fetcher.get(&self.settings.version_list_url)?;
        // Reject garbage before it replaces a good copy on disk.
        serde_json::from_slice::<Value>(&body)?;
        write_atomic(&path, &body)?;
        Ok(body)
    }
}

fn is_fresh(path: &Path, ttl: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age < ttl)
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("path has no parent"))?;
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| MirrorError::Io(e.error))?;
    Ok(())
}
