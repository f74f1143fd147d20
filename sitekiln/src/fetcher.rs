/*
 *  Copyright 2025 Sitekiln Contributors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! External collaborator contracts: the HTTP fetcher and the sitemap
//! discoverer.
//!
//! The scheduling engine never performs network I/O itself. Implementations
//! of these traits are injected through constructors; the engine only
//! assumes they are idempotent and honour cancellation.
//!
//! Any HTTP response — including 4xx/5xx — arrives as a [`FetchOutcome`];
//! a [`FetchError`] means the request never produced a response (transport
//! failure, cancellation). The worker pool classifies both into retryable
//! and permanent failures.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// The result of warming one URL through the CDN-friendly client.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// HTTP status code of the response
    pub status_code: i32,
    /// Wall-clock time of the request in milliseconds
    pub response_time_ms: i64,
    /// Opaque CDN-provided cache label, e.g. `HIT`, `MISS`, `DYNAMIC`
    pub cache_status: String,
    /// Content-Type header of the response
    pub content_type: String,
    /// Hyperlinks extracted from the page body, when link discovery is on
    pub discovered_links: Vec<String>,
}

/// Transport-level failures from the fetcher.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("dns resolution failed: {0}")]
    Dns(String),

    #[error("tls handshake failed: {0}")]
    Tls(String),

    #[error("fetch cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Timeouts and dropped connections are worth another attempt; DNS and
    /// TLS failures are permanent for the lifetime of a crawl.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Timeout | FetchError::Connect(_))
    }
}

/// The CDN-warming HTTP client.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Issues a GET for `url`, recording cache status and latency. Must be
    /// idempotent and abort promptly when `cancel` fires.
    async fn warm(&self, url: &str, cancel: &CancellationToken)
        -> Result<FetchOutcome, FetchError>;
}

/// Sitemap discovery for a domain.
#[async_trait]
pub trait SitemapDiscoverer: Send + Sync {
    /// Returns every URL listed in the sitemaps reachable from `base_url`.
    async fn discover(
        &self,
        base_url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, FetchError>;
}
