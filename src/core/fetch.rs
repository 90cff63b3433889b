//! Network access for the cache.
//!
//! [`Fetcher`] is the seam between the cache and the upstream source. The
//! cache never talks to the network directly, which keeps integrity checks
//! testable with an in-memory fetcher.

use crate::core::error::{MirrorError, Result};
use std::io::Read;
use std::time::Duration;

pub trait Fetcher: Send + Sync {
    /// Retrieve the full body at `url`.
    fn get(&self, url: &str) -> Result<Vec<u8>>;
}

/// Blocking HTTP fetcher backed by `ureq`.
pub struct HttpFetcher {
    agent: ureq::Agent,
    attempts: u32,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, attempts: u32) -> Self {
        let agent = ureq::AgentBuilder::new()
            .user_agent(user_agent)
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(120))
            .build();
        Self {
            agent,
            attempts: attempts.max(1),
        }
    }

    fn get_once(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.agent.get(url).call().map_err(|err| match err {
            ureq::Error::Status(code, _response) => MirrorError::upstream_status(url, code),
            ureq::Error::Transport(transport) => {
                MirrorError::upstream_transport(url, transport.to_string())
            }
        })?;

        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| MirrorError::upstream_transport(url, e.to_string()))?;
        Ok(body)
    }
}

impl Fetcher for HttpFetcher {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        let mut attempt = 1;
        loop {
            match self.get_once(url) {
                Ok(body) => {
                    log::debug!("Fetched {} bytes from {url}", body.len());
                    return Ok(body);
                }
                Err(e) if e.is_retryable_fetch() && attempt < self.attempts => {
                    log::warn!("Fetch attempt {attempt}/{} for {url} failed: {e}", self.attempts);
                    std::thread::sleep(Duration::from_millis(500 * u64::from(attempt)));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryFetcher;
    use super::*;

    #[test]
    fn test_memory_fetcher_counts_calls() -> Result<()> {
        let fetcher = MemoryFetcher::new();
        fetcher.insert("mem://a", b"abc".to_vec());
        assert_eq!(fetcher.get("mem://a")?, b"abc");
        assert_eq!(fetcher.get("mem://a")?, b"abc");
        assert_eq!(fetcher.calls("mem://a"), 2);
        Ok(())
    }

    #[test]
    fn test_memory_fetcher_missing_is_upstream_404() {
        let fetcher = MemoryFetcher::new();
        match fetcher.get("mem://missing") {
            Err(MirrorError::Upstream { status, .. }) => assert_eq!(status, Some(404)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_http_fetcher_rejects_unreachable_host() {
        let fetcher = HttpFetcher::new("asset-mirror-test", 1);
        let result = fetcher.get("http://127.0.0.1:9/unreachable");
        assert!(matches!(result, Err(MirrorError::Upstream { status: None, .. })));
    }
}
