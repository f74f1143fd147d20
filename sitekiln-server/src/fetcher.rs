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

//! HTTP implementations of the scheduler's external collaborator contracts:
//! a CDN-warming fetcher and a sitemap discoverer.
//!
//! The scheduler core only sees the [`Fetcher`] and [`SitemapDiscoverer`]
//! traits; this module is the operator wiring, deliberately lightweight —
//! link and sitemap extraction are plain string scans, good enough for
//! cache warming where a missed link costs nothing.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sitekiln::{FetchError, FetchOutcome, Fetcher, SitemapDiscoverer};

/// Response headers CDNs use to report cache status, in probe order.
const CACHE_STATUS_HEADERS: &[&str] = &[
    "cf-cache-status",
    "x-vercel-cache",
    "x-cache-status",
    "x-cache",
];

/// CDN-friendly warming client backed by `reqwest`.
pub struct CdnFetcher {
    client: reqwest::Client,
}

impl CdnFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("sitekiln/0.1 (+cache-warmer)")
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for CdnFetcher {
    async fn warm(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        let start = Instant::now();

        let response = tokio::select! {
            result = self.client.get(url).send() => result.map_err(map_reqwest_error)?,
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        };

        let status_code = response.status().as_u16() as i32;
        let cache_status = CACHE_STATUS_HEADERS
            .iter()
            .find_map(|name| response.headers().get(*name))
            .and_then(|value| value.to_str().ok())
            .unwrap_or("UNKNOWN")
            .to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        // Drain the body so the edge caches the full object; keep HTML for
        // link extraction.
        let body = tokio::select! {
            result = response.text() => result.map_err(map_reqwest_error)?,
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        };
        let response_time_ms = start.elapsed().as_millis() as i64;

        let discovered_links = if content_type.contains("text/html") {
            extract_links(&body)
        } else {
            Vec::new()
        };

        debug!(
            url,
            status_code,
            cache_status = %cache_status,
            response_time_ms,
            links = discovered_links.len(),
            "warmed url"
        );

        Ok(FetchOutcome {
            status_code,
            response_time_ms,
            cache_status,
            content_type,
            discovered_links,
        })
    }
}

/// Sitemap discovery over `https://{domain}/sitemap.xml`, following one
/// level of sitemap-index indirection.
pub struct SitemapClient {
    client: reqwest::Client,
}

/// Upper bound on nested sitemaps fetched from an index.
const MAX_NESTED_SITEMAPS: usize = 50;

impl SitemapClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("sitekiln/0.1 (+cache-warmer)")
            .build()?;
        Ok(Self { client })
    }

    async fn fetch_locs(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, FetchError> {
        let response = tokio::select! {
            result = self.client.get(url).send() => result.map_err(map_reqwest_error)?,
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        };
        if !response.status().is_success() {
            return Err(FetchError::Other(format!(
                "sitemap fetch failed: HTTP {} for {}",
                response.status().as_u16(),
                url
            )));
        }
        let body = tokio::select! {
            result = response.text() => result.map_err(map_reqwest_error)?,
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        };
        Ok(extract_locs(&body))
    }
}

#[async_trait]
impl SitemapDiscoverer for SitemapClient {
    async fn discover(
        &self,
        base_url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, FetchError> {
        let sitemap_url = format!("{}/sitemap.xml", base_url.trim_end_matches('/'));
        let entries = self.fetch_locs(&sitemap_url, cancel).await?;

        // A sitemap index lists further .xml sitemaps instead of pages.
        let (nested, mut pages): (Vec<String>, Vec<String>) = entries
            .into_iter()
            .partition(|entry| entry.trim_end().ends_with(".xml"));

        for nested_url in nested.into_iter().take(MAX_NESTED_SITEMAPS) {
            match self.fetch_locs(&nested_url, cancel).await {
                Ok(locs) => pages.extend(locs),
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(error) => {
                    debug!(url = %nested_url, error = %error, "skipping unreadable nested sitemap");
                }
            }
        }

        Ok(pages)
    }
}

fn map_reqwest_error(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else if error.is_connect() {
        FetchError::Connect(error.to_string())
    } else {
        FetchError::Other(error.to_string())
    }
}

/// Pulls `href` attribute values out of an HTML document.
fn extract_links(html: &str) -> Vec<String> {
    let mut links = Vec::new();
    for quote in ['"', '\''] {
        let needle = format!("href={}", quote);
        let mut rest = html;
        while let Some(at) = rest.find(&needle) {
            rest = &rest[at + needle.len()..];
            if let Some(end) = rest.find(quote) {
                let link = rest[..end].trim();
                if !link.is_empty()
                    && !link.starts_with('#')
                    && !link.starts_with("javascript:")
                    && !link.starts_with("mailto:")
                    && !link.starts_with("tel:")
                {
                    links.push(link.to_string());
                }
                rest = &rest[end..];
            } else {
                break;
            }
        }
    }
    links
}

/// Pulls `<loc>` element contents out of a sitemap document.
fn extract_locs(xml: &str) -> Vec<String> {
    let mut locs = Vec::new();
    let mut rest = xml;
    while let Some(at) = rest.find("<loc>") {
        rest = &rest[at + "<loc>".len()..];
        if let Some(end) = rest.find("</loc>") {
            let loc = rest[..end].trim();
            if !loc.is_empty() {
                locs.push(loc.to_string());
            }
            rest = &rest[end..];
        } else {
            break;
        }
    }
    locs
}
