//! Conditional HTTP fetching for ICS feeds
//!
//! Issues conditional GETs with `If-None-Match`/`If-Modified-Since` and a
//! bounded deadline. Transport failures and timeouts are reported as
//! status `0` so the caller can classify them uniformly with HTTP errors.

use std::time::Duration;
use tempo_core::error::{CoreError, CoreResult};
use tokio_util::sync::CancellationToken;

/// Default deadline for any outbound feed request
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

const USER_AGENT: &str = concat!("tempo-feed/", env!("CARGO_PKG_VERSION"));

/// Result of one conditional fetch. `status` is the HTTP status code, or
/// `0` when the request never produced a response.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub status: u16,
    pub body: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// HTTP client wrapper for feed fetching
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
}

impl FeedFetcher {
    pub fn new() -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(CoreError::internal)?;
        Ok(Self { client })
    }

    /// Fetch a feed URL with conditional headers.
    ///
    /// Cancellation and transport errors yield `status = 0`; the caller
    /// treats that as a retryable timeout.
    pub async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/calendar, text/plain");
        if let Some(etag) = etag {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = last_modified {
            request = request.header(reqwest::header::IF_MODIFIED_SINCE, last_modified);
        }

        let response = tokio::select! {
            response = request.send() => response,
            () = cancel.cancelled() => {
                tracing::debug!(url, "feed fetch cancelled");
                return FetchOutcome::default();
            }
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url, error = %e, "feed fetch transport failure");
                return FetchOutcome::default();
            }
        };

        let status = response.status().as_u16();
        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let etag = header(reqwest::header::ETAG);
        let last_modified = header(reqwest::header::LAST_MODIFIED);

        let body = if (200..300).contains(&status) {
            match response.text().await {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::warn!(url, error = %e, "feed body read failure");
                    return FetchOutcome::default();
                }
            }
        } else {
            None
        };

        FetchOutcome {
            status,
            body,
            etag,
            last_modified,
        }
    }
}
