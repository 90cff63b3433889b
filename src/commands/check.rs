use super::Session;
use crate::core::{
    config::SyncConfig,
    pipeline::{run_versions, select_versions, StepOutcome},
    print_info, print_run_summary, print_success, print_warning, ContentCache, FailurePolicy,
    HashAlgorithm, ManifestResolver, MirrorError, Result, RunSummary,
};

/// Flags accepted by `asset-mirror check`.
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    pub version: Option<String>,
    /// Also re-hash every blob already in the cache.
    pub verify_cache: bool,
    pub fail_fast: bool,
}

pub fn execute_check(config: &SyncConfig, options: CheckOptions) -> Result<RunSummary> {
    let session = Session::open(config);
    let resolver = session.resolver(config);

    let list = resolver.resolve_version_list()?;
    let versions = select_versions(&list, options.version.as_deref())?;
    let policy = if options.fail_fast {
        FailurePolicy::FailFast
    } else {
        config.failure_policy
    };

    let mut summary = run_versions(&versions, policy, |version| {
        check_version(&resolver, &version.id)
    });
    print_run_summary("Check", &summary);

    if options.verify_cache && !summary.halted {
        let corrupt = verify_cache(&session.cache)?;
        if corrupt.is_empty() {
            print_success("Cache blobs verified");
        }
        summary.failed.extend(corrupt);
    }
    Ok(summary)
}

/// Resolve a version's manifest and asset index into the typed model and
/// make sure it names a client archive. Nothing is materialized.
pub fn check_version(resolver: &ManifestResolver<'_>, version_id: &str) -> Result<StepOutcome> {
    let manifest = resolver.resolve_version(version_id)?;
    manifest.download("client")?;
    let index = resolver.resolve_asset_index(version_id)?;
    log::debug!(
        "{version_id}: {} libraries, {} asset objects",
        manifest.libraries.len(),
        index.objects.len()
    );
    Ok(StepOutcome::Completed)
}

/// Re-hash every cached blob, returning the ones that no longer match
/// their key.
fn verify_cache(cache: &ContentCache) -> Result<Vec<(String, MirrorError)>> {
    let mut corrupt = Vec::new();
    for algorithm in [HashAlgorithm::Sha1, HashAlgorithm::Sha256] {
        let entries = cache.entries(algorithm)?;
        print_info(&format!(
            "Verifying {} {} blob(s)",
            entries.len(),
            algorithm.name()
        ));
        for entry in entries {
            if let Err(e) = cache.verify(&entry) {
                print_warning(&e.to_string());
                corrupt.push((entry.digest.to_string(), e));
            }
        }
    }
    Ok(corrupt)
}
