//! Source PDF download.
//!
//! Each step downloads the source fresh rather than caching bytes between
//! steps: steps may be minutes apart (retry delays) or land on a different
//! process entirely after a restart, so there is no safe place to keep the
//! buffer. The magic-byte check catches the common failure of a URL that
//! serves an HTML error page with HTTP 200 — pdfium's own error for that is
//! unhelpful.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Why a source download failed. The message becomes the job's `last_error`,
/// so each variant spells out what a human should check.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download failed for {url}: HTTP {status}")]
    Http { url: String, status: u16 },

    #[error("download failed for {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("{url} is not a PDF (missing %PDF header)")]
    NotPdf { url: String },
}

/// Seam for obtaining the source document bytes.
pub trait SourceFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// Production fetcher over reqwest.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if !bytes.starts_with(b"%PDF") {
            return Err(FetchError::NotPdf {
                url: url.to_string(),
            });
        }

        debug!(url, size = bytes.len(), "downloaded source PDF");
        Ok(bytes.to_vec())
    }
}
