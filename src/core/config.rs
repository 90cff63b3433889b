//! Run configuration.
//!
//! [`SyncConfig`] is read from JSON, either from an explicit path or from
//! `<config-dir>/asset-mirror/config.json`. Every field has a default, so a
//! partial file (or no file at all) is valid. Command-line flags are applied
//! on top by the commands.

use crate::core::archive::InclusionPolicy;
use crate::core::dirs::{get_cache_directory, get_config_directory, get_data_directory};
use crate::core::error::{MirrorError, Result};
use crate::core::manifest::ResolverSettings;
use crate::core::overlay::{BindfsOverlay, LinkOverlay, OverlayMount};
use crate::core::pipeline::FailurePolicy;
use crate::core::publish::{
    HistoryMode, PublishSettings, DEFAULT_COMMIT_TEMPLATE, DEFAULT_PUBLISH_ATTEMPTS,
};
use crate::core::vcs::GitIdentity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "config.json";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ArchivePolicy {
    Resources,
    #[default]
    NonCode,
}

impl ArchivePolicy {
    pub fn inclusion_policy(self) -> InclusionPolicy {
        match self {
            Self::Resources => InclusionPolicy::resources(),
            Self::NonCode => InclusionPolicy::non_code(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OverlayMode {
    #[default]
    Bindfs,
    Link,
}

impl OverlayMode {
    pub fn overlay(self) -> Box<dyn OverlayMount> {
        match self {
            Self::Bindfs => Box::new(BindfsOverlay),
            Self::Link => Box::new(LinkOverlay::new()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub cache_root: PathBuf,
    pub output_root: PathBuf,
    pub git_root: PathBuf,
    pub restore_root: PathBuf,
    pub remote_url: Option<String>,
    pub version_manifest_url: String,
    pub asset_base_url: String,
    pub user_agent: String,
    pub overlay_path: Option<PathBuf>,
    pub commit_template: String,
    pub squash: bool,
    pub failure_policy: FailurePolicy,
    pub archive_policy: ArchivePolicy,
    pub overlay_mode: OverlayMode,
    pub keep_archives: bool,
    pub fetch_attempts: u32,
    pub publish_attempts: u32,
    pub version_list_ttl_secs: u64,
    pub marker_staleness_secs: u64,
    pub git_name: String,
    pub git_email: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let data = get_data_directory();
        let identity = GitIdentity::default();
        Self {
            cache_root: get_cache_directory(),
            output_root: data.join("out"),
            git_root: data.join("git"),
            restore_root: data.join("restore"),
            remote_url: None,
            version_manifest_url:
                "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json".to_string(),
            asset_base_url: "https://resources.download.minecraft.net".to_string(),
            user_agent: format!("asset-mirror/{}", env!("CARGO_PKG_VERSION")),
            overlay_path: None,
            commit_template: DEFAULT_COMMIT_TEMPLATE.to_string(),
            squash: false,
            failure_policy: FailurePolicy::default(),
            archive_policy: ArchivePolicy::default(),
            overlay_mode: OverlayMode::default(),
            keep_archives: true,
            fetch_attempts: 3,
            publish_attempts: DEFAULT_PUBLISH_ATTEMPTS,
            version_list_ttl_secs: 30 * 60,
            marker_staleness_secs: 30 * 60,
            git_name: identity.name,
            git_email: identity.email,
        }
    }
}

impl SyncConfig {
    pub fn default_path() -> PathBuf {
        get_config_directory().join(CONFIG_FILE)
    }

    /// Load from `path`, which must exist, or from the default location,
    /// falling back to defaults when nothing is there.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::default_path(), false),
        };

        if !path.exists() {
            if required {
                return Err(MirrorError::config(format!(
                    "config file '{}' does not exist",
                    path.display()
                )));
            }
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            MirrorError::config(format!("invalid config '{}': {e}", path.display()))
        })?;
        config.validate()?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch_attempts == 0 || self.publish_attempts == 0 {
            return Err(MirrorError::config("attempt counts must be at least 1"));
        }
        if !self.commit_template.lines().next().is_some_and(|l| !l.trim().is_empty()) {
            return Err(MirrorError::config("commit_template needs a subject line"));
        }
        Ok(())
    }

    pub fn remote_url(&self) -> Result<&str> {
        self.remote_url
            .as_deref()
            .ok_or_else(|| MirrorError::config("remote_url is required for publishing"))
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.cache_root.join("meta")
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.marker_staleness_secs)
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            version_list_url: self.version_manifest_url.clone(),
            meta_dir: self.meta_dir(),
            overlay_path: self.overlay_path.clone(),
            ttl: Duration::from_secs(self.version_list_ttl_secs),
        }
    }

    pub fn publish_settings(&self) -> Result<PublishSettings> {
        Ok(PublishSettings {
            remote_url: self.remote_url()?.to_string(),
            git_root: self.git_root.clone(),
            output_root: self.output_root.clone(),
            commit_template: self.commit_template.clone(),
            history: if self.squash {
                HistoryMode::Squash
            } else {
                HistoryMode::Additive
            },
            max_attempts: self.publish_attempts,
            retry_delay: Duration::from_secs(2),
        })
    }

    pub fn git_identity(&self) -> GitIdentity {
        GitIdentity {
            name: self.git_name.clone(),
            email: self.git_email.clone(),
        }
    }
}
