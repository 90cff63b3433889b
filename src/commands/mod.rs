pub mod check;
pub mod download;
pub mod publish;
pub mod restore;

pub use check::*;
pub use download::*;
pub use publish::*;
pub use restore::*;

use crate::core::{
    config::SyncConfig, print_version_start, ConsoleProgress, ContentCache, Fetcher, HttpFetcher,
    ManifestResolver, ProgressObserver, Result,
};
use std::sync::Arc;

/// Cache and fetcher shared by every subcommand that touches upstream.
pub(crate) struct Session {
    pub fetcher: Arc<dyn Fetcher>,
    pub cache: ContentCache,
}

impl Session {
    pub fn open(config: &SyncConfig) -> Self {
        let fetcher: Arc<dyn Fetcher> =
            Arc::new(HttpFetcher::new(&config.user_agent, config.fetch_attempts));
        let cache = ContentCache::new(&config.cache_root, fetcher.clone());
        Self { fetcher, cache }
    }

    pub fn resolver(&self, config: &SyncConfig) -> ManifestResolver<'_> {
        ManifestResolver::new(&self.cache, self.fetcher.clone(), config.resolver_settings())
    }
}

/// Run `work` with a console status line for `version_id`, ticking on a
/// terminal until `work` returns.
pub(crate) fn with_progress<T>(
    version_id: &str,
    work: impl FnOnce(&dyn ProgressObserver) -> Result<T>,
) -> Result<T> {
    print_version_start(version_id);
    let progress = ConsoleProgress::new(version_id);
    let ticker = progress.start_ticker();
    let result = work(progress.as_ref());
    drop(ticker);
    progress.finish();
    result
}
