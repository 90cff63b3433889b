use super::with_progress;
use crate::core::{
    config::SyncConfig,
    manifest::canonical_version_id,
    pipeline::{run_versions, StepOutcome},
    print_info, print_run_summary, FailurePolicy, MirrorError, RestoreRecord, Result, RunSummary,
};
use std::fs;
use std::path::Path;

/// Flags accepted by `asset-mirror restore`.
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub version: Option<String>,
    pub fail_fast: bool,
}

/// Rebuild output trees from restore ledgers and the local cache only.
pub fn execute_restore(config: &SyncConfig, options: RestoreOptions) -> Result<RunSummary> {
    let mut ledgers = list_ledgers(&config.restore_root)?;
    if let Some(only) = options.version.as_deref() {
        let canonical = canonical_version_id(only);
        ledgers.retain(|id| id == only || *id == canonical);
        if ledgers.is_empty() {
            return Err(MirrorError::not_found("Restore file", only));
        }
    }
    if ledgers.is_empty() {
        print_info(&format!(
            "No restore files in {}",
            config.restore_root.display()
        ));
    }

    let policy = if options.fail_fast {
        FailurePolicy::FailFast
    } else {
        config.failure_policy
    };

    let summary = run_versions(ledgers, policy, |version_id| {
        let record = RestoreRecord::read(&config.restore_root.join(version_id))?;
        let total = record.len();
        with_progress(version_id, |progress| {
            progress.on_progress("restoring files", 0, Some(total));
            record.replay(
                &config.cache_root,
                &config.output_root.join(version_id),
                |done| {
                    if done % 100 == 0 || done == total {
                        progress.on_progress("restoring files", done, Some(total));
                    }
                },
            )
        })?;
        log::info!("Restored {total} file(s) for {version_id}");
        Ok(StepOutcome::Completed)
    });

    print_run_summary("Restore", &summary);
    Ok(summary)
}

/// Ledger names in `dir`, sorted. A missing directory holds no ledgers;
/// dotfiles are unfinished writes.
fn list_ledgers(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_file() && !name.starts_with('.') {
            ids.push(name);
        }
    }
    ids.sort();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(temp: &TempDir) -> SyncConfig {
        SyncConfig {
            cache_root: temp.path().join("cache"),
            output_root: temp.path().join("output"),
            restore_root: temp.path().join("restore"),
            ..SyncConfig::default()
        }
    }

    #[test]
    fn test_restore_replays_every_ledger() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let blob = config.cache_root.join("sha1/ab/cdef");
        fs::create_dir_all(blob.parent().unwrap())?;
        fs::write(&blob, b"sound")?;

        let mut record = RestoreRecord::new();
        record.push("sha1/ab/cdef".into(), "assets/minecraft/sounds.json".into());
        record.write(&config.restore_root.join("1.20.1"))?;
        record.write(&config.restore_root.join("1.19"))?;

        let summary = execute_restore(&config, RestoreOptions::default())?;
        assert_eq!(summary.completed, vec!["1.19", "1.20.1"]);
        assert_eq!(
            fs::read(config.output_root.join("1.20.1/assets/minecraft/sounds.json"))?,
            b"sound"
        );
        Ok(())
    }

    #[test]
    fn test_missing_blob_fails_version() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let mut record = RestoreRecord::new();
        record.push("sha1/ff/0000".into(), "assets/gone.png".into());
        record.write(&config.restore_root.join("1.8.9"))?;

        let summary = execute_restore(&config, RestoreOptions::default())?;
        assert!(!summary.is_success());
        assert!(matches!(summary.failed[0].1, MirrorError::NotFound { .. }));
        Ok(())
    }

    #[test]
    fn test_unknown_version_is_not_found() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let result = execute_restore(
            &config,
            RestoreOptions {
                version: Some("1.0".to_string()),
                fail_fast: false,
            },
        );
        assert!(matches!(result, Err(MirrorError::NotFound { .. })));
    }
}
