//! Filesystem overlays used to stage output trees into working copies.
//!
//! [`BindfsOverlay`] mounts each directory with `bindfs` so large binary
//! trees are never duplicated. [`LinkOverlay`] hard-links the tree instead
//! and works without FUSE. Either way, staged overlays are held by a
//! [`MountGuard`] that releases them on every exit path.

use crate::core::error::{MirrorError, Result};
use crate::core::materialize::link_or_copy;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, PoisonError};

pub trait OverlayMount {
    fn mount(&self, source: &Path, target: &Path) -> Result<()>;

    fn unmount(&self, target: &Path) -> Result<()>;

    /// Release every overlay at or below `root`. Returns how many were
    /// released.
    fn unmount_all_under(&self, root: &Path) -> Result<usize>;
}

/// FUSE bind mounts via `bindfs` / `fusermount -u`.
#[derive(Debug, Default)]
pub struct BindfsOverlay;

impl BindfsOverlay {
    fn run(action: &'static str, target: &Path, mut cmd: Command) -> Result<()> {
        let output = cmd
            .output()
            .map_err(|e| MirrorError::mount(action, target, e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MirrorError::mount(action, target, stderr.trim()));
        }
        Ok(())
    }

    fn mount_points_under(root: &Path) -> Result<Vec<PathBuf>> {
        let table = fs::read_to_string("/proc/mounts")?;
        let mut points: Vec<PathBuf> = table
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .map(|field| PathBuf::from(unescape_mount_field(field)))
            .filter(|point| point.starts_with(root))
            .collect();
        // Deepest first.
        points.sort_by_key(|point| std::cmp::Reverse(point.components().count()));
        Ok(points)
    }
}

/// `/proc/mounts` escapes whitespace and backslashes as octal.
fn unescape_mount_field(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

impl OverlayMount for BindfsOverlay {
    fn mount(&self, source: &Path, target: &Path) -> Result<()> {
        fs::create_dir_all(target)?;
        let mut cmd = Command::new("bindfs");
        cmd.args(["-o", "nonempty", "--no-allow-other"])
            .arg(source)
            .arg(target);
        Self::run("mount", target, cmd)?;
        log::debug!("Mounted {} at {}", source.display(), target.display());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        let mut cmd = Command::new("fusermount");
        cmd.arg("-u").arg(target);
        Self::run("unmount", target, cmd)?;
        log::debug!("Unmounted {}", target.display());
        Ok(())
    }

    fn unmount_all_under(&self, root: &Path) -> Result<usize> {
        let points = Self::mount_points_under(root)?;
        for point in &points {
            self.unmount(point)?;
        }
        Ok(points.len())
    }
}

/// Hard-link "overlay". Tracks what it linked so release can undo it.
#[derive(Debug, Default)]
pub struct LinkOverlay {
    active: Mutex<BTreeSet<PathBuf>>,
}

impl LinkOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Vec<PathBuf> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn link_tree(source: &Path, target: &Path) -> Result<()> {
        fs::create_dir_all(target)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            let from = entry.path();
            let to = target.join(entry.file_name());
            if entry.file_type()?.is_dir() {
                Self::link_tree(&from, &to)?;
            } else {
                link_or_copy(&from, &to)?;
            }
        }
        Ok(())
    }
}

impl OverlayMount for LinkOverlay {
    fn mount(&self, source: &Path, target: &Path) -> Result<()> {
        Self::link_tree(source, target)
            .map_err(|e| MirrorError::mount("mount", target, e.to_string()))?;
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        let was_active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target);
        if was_active && target.exists() {
            fs::remove_dir_all(target)
                .map_err(|e| MirrorError::mount("unmount", target, e.to_string()))?;
        }
        Ok(())
    }

    fn unmount_all_under(&self, root: &Path) -> Result<usize> {
        let targets: Vec<PathBuf> = self
            .active()
            .into_iter()
            .filter(|target| target.starts_with(root))
            .collect();
        for target in &targets {
            self.unmount(target)?;
        }
        Ok(targets.len())
    }
}

/// Overlays established for one staging pass.
pub struct MountGuard<'a> {
    overlay: &'a dyn OverlayMount,
    mounted: Vec<PathBuf>,
}

impl<'a> MountGuard<'a> {
    pub fn new(overlay: &'a dyn OverlayMount) -> Self {
        Self {
            overlay,
            mounted: Vec::new(),
        }
    }

    pub fn mount(&mut self, source: &Path, target: &Path) -> Result<()> {
        self.overlay.mount(source, target)?;
        self.mounted.push(target.to_path_buf());
        Ok(())
    }

    pub fn mounted(&self) -> &[PathBuf] {
        &self.mounted
    }

    /// Unmount in reverse order. Keeps going after a failure and reports
    /// the first error.
    pub fn release(&mut self) -> Result<()> {
        let mut first_error = None;
        while let Some(target) = self.mounted.pop() {
            if let Err(e) = self.overlay.unmount(&target) {
                log::warn!("Failed to release overlay {}: {e}", target.display());
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
