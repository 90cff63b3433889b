use super::{with_progress, Session};
use crate::core::{
    config::SyncConfig,
    pipeline::{run_versions, select_versions, DownloadSettings},
    print_run_summary, CompletionMarkers, DownloadPipeline, FailurePolicy, NoProgress, Result,
    RunSummary,
};

/// Flags accepted by `asset-mirror download`.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub version: Option<String>,
    pub force: bool,
    pub include_lang: bool,
    pub create_restore: bool,
    /// Overrides `keep_archives` from the config when set.
    pub keep_archives: Option<bool>,
    pub fail_fast: bool,
}

pub fn execute_download(config: &SyncConfig, options: DownloadOptions) -> Result<RunSummary> {
    let session = Session::open(config);
    let resolver = session.resolver(config);
    let markers = CompletionMarkers::new(&config.cache_root);
    let policy = config.archive_policy.inclusion_policy();

    let settings = DownloadSettings {
        output_root: config.output_root.clone(),
        restore_dir: config.restore_root.clone(),
        asset_base_url: config.asset_base_url.clone(),
        force: options.force,
        include_lang: options.include_lang,
        create_restore: options.create_restore,
        keep_archives: options.keep_archives.unwrap_or(config.keep_archives),
        staleness: config.staleness(),
    };
    let pipeline = DownloadPipeline::new(&resolver, &markers, &policy, settings);

    let list = resolver.resolve_version_list()?;
    let versions = select_versions(&list, options.version.as_deref())?;
    log::info!("{} version(s) to check", versions.len());

    let failure_policy = if options.fail_fast {
        FailurePolicy::FailFast
    } else {
        config.failure_policy
    };

    let summary = run_versions(&versions, failure_policy, |version| {
        let manifest = version.manifest_digest()?;
        // Skipped versions stay quiet.
        if markers.should_skip_download(&manifest, options.force, config.staleness()) {
            return pipeline.download_version(version, &NoProgress);
        }
        with_progress(&version.id, |progress| {
            pipeline.download_version(version, progress)
        })
    });

    print_run_summary("Download", &summary);
    Ok(summary)
}
