use super::{with_progress, Session};
use crate::core::{
    config::SyncConfig,
    pipeline::{run_versions, select_versions, StepOutcome},
    print_run_summary, CompletionMarkers, Digest, FailurePolicy, GitCliBackend,
    PublishOrchestrator, PublishRequest, Result, RunSummary,
};

/// Flags accepted by `asset-mirror publish`.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub version: Option<String>,
    pub fail_fast: bool,
}

pub fn execute_publish(config: &SyncConfig, options: PublishOptions) -> Result<RunSummary> {
    let settings = config.publish_settings()?;
    let session = Session::open(config);
    let resolver = session.resolver(config);
    let markers = CompletionMarkers::new(&config.cache_root);
    let backend = GitCliBackend::new(config.git_identity());
    let overlay = config.overlay_mode.overlay();
    let orchestrator = PublishOrchestrator::new(&backend, overlay.as_ref(), &markers, settings);

    let list = resolver.resolve_version_list()?;
    let versions = select_versions(&list, options.version.as_deref())?;

    let failure_policy = if options.fail_fast {
        FailurePolicy::FailFast
    } else {
        config.failure_policy
    };

    let summary = run_versions(&versions, failure_policy, |version| {
        let manifest_digest = version.manifest_digest()?;
        if markers.should_skip_publish(&manifest_digest) {
            return Ok(StepOutcome::Skipped);
        }

        let manifest = resolver.resolve_version(&version.id)?;
        let request = PublishRequest {
            version_id: version.id.clone(),
            manifest_digest,
            asset_index_digest: Some(Digest::sha1(&manifest.asset_index.sha1)?),
        };
        let report = with_progress(&version.id, |progress| {
            orchestrator.publish(&request, progress)
        })?;
        Ok(if report.skipped {
            StepOutcome::Skipped
        } else {
            StepOutcome::Completed
        })
    });

    print_run_summary("Publish", &summary);
    Ok(summary)
}
