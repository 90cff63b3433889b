//! Completion markers.
//!
//! A marker is a small file under `<cache-root>/completion/<stage>/<hash>`
//! keyed by the version's manifest hash, written only once every side
//! effect of its stage is on disk. Its mtime is the completion timestamp.

use crate::core::digest::Digest;
use crate::core::error::Result;
use crate::core::manifest::write_atomic;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const MARKER_CONTENT: &[u8] = b"100\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Download,
    Publish,
}

impl Stage {
    pub fn dir_name(self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Publish => "publish",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionMarkers {
    root: PathBuf,
}

impl CompletionMarkers {
    pub fn new(cache_root: &Path) -> Self {
        Self {
            root: cache_root.join("completion"),
        }
    }

    pub fn path(&self, stage: Stage, manifest: &Digest) -> PathBuf {
        self.root.join(stage.dir_name()).join(manifest.as_hex())
    }

    pub fn mark(&self, stage: Stage, manifest: &Digest) -> Result<()> {
        let path = self.path(stage, manifest);
        write_atomic(&path, MARKER_CONTENT)?;
        log::debug!("Marked {} complete for {manifest}", stage.dir_name());
        Ok(())
    }

    pub fn exists(&self, stage: Stage, manifest: &Digest) -> bool {
        self.path(stage, manifest).is_file()
    }

    pub fn modified(&self, stage: Stage, manifest: &Digest) -> Option<SystemTime> {
        fs::metadata(self.path(stage, manifest))
            .and_then(|meta| meta.modified())
            .ok()
    }

    /// True when the marker exists and is younger than `window`.
    pub fn is_fresh(&self, stage: Stage, manifest: &Digest, window: Duration) -> bool {
        self.modified(stage, manifest)
            .and_then(|mtime| mtime.elapsed().ok())
            .is_some_and(|age| age < window)
    }

    /// Download is skipped when done before, unless forced; a forced run
    /// still skips versions finished within `window`.
    pub fn should_skip_download(&self, manifest: &Digest, force: bool, window: Duration) -> bool {
        let done = self.exists(Stage::Download, manifest);
        (done && !force) || (done && self.is_fresh(Stage::Download, manifest, window))
    }

    /// Publish is skipped when there is nothing downloaded yet, or when the
    /// publish marker is newer than the download marker.
    pub fn should_skip_publish(&self, manifest: &Digest) -> bool {
        let Some(downloaded) = self.modified(Stage::Download, manifest) else {
            return true;
        };
        self.modified(Stage::Publish, manifest)
            .is_some_and(|published| published > downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::digest::HashAlgorithm;
    use tempfile::TempDir;

    fn set_mtime(path: &Path, time: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn test_mark_writes_content() -> Result<()> {
        let temp = TempDir::new()?;
        let markers = CompletionMarkers::new(temp.path());
        let digest = HashAlgorithm::Sha1.digest_bytes(b"manifest");
        assert!(!markers.exists(Stage::Download, &digest));
        markers.mark(Stage::Download, &digest)?;
        let path = temp
            .path()
            .join("completion/download")
            .join(digest.as_hex());
        assert_eq!(fs::read(path)?, b"100\n");
        assert!(!markers.exists(Stage::Publish, &digest));
        Ok(())
    }

    #[test]
    fn test_download_skip_rule() -> Result<()> {
        let temp = TempDir::new()?;
        let markers = CompletionMarkers::new(temp.path());
        let digest = HashAlgorithm::Sha1.digest_bytes(b"manifest");
        let window = Duration::from_secs(1800);

        assert!(!markers.should_skip_download(&digest, false, window));
        markers.mark(Stage::Download, &digest)?;
        assert!(markers.should_skip_download(&digest, false, window));
        // Fresh marker: even --force leaves it alone.
        assert!(markers.should_skip_download(&digest, true, window));

        let old = SystemTime::now() - Duration::from_secs(3600);
        set_mtime(&markers.path(Stage::Download, &digest), old);
        assert!(markers.should_skip_download(&digest, false, window));
        assert!(!markers.should_skip_download(&digest, true, window));
        Ok(())
    }

    #[test]
    fn test_publish_skip_rule() -> Result<()> {
        let temp = TempDir::new()?;
        let markers = CompletionMarkers::new(temp.path());
        let digest = HashAlgorithm::Sha1.digest_bytes(b"manifest");

        assert!(markers.should_skip_publish(&digest), "nothing downloaded yet");

        markers.mark(Stage::Download, &digest)?;
        assert!(!markers.should_skip_publish(&digest));

        markers.mark(Stage::Publish, &digest)?;
        let now = SystemTime::now();
        set_mtime(&markers.path(Stage::Download, &digest), now - Duration::from_secs(60));
        set_mtime(&markers.path(Stage::Publish, &digest), now);
        assert!(markers.should_skip_publish(&digest));

        // Re-downloaded after publishing: publish again.
        set_mtime(&markers.path(Stage::Download, &digest), now + Duration::from_secs(60));
        assert!(!markers.should_skip_publish(&digest));
        Ok(())
    }
}
