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

//! URL normalisation and path filtering.
//!
//! Tasks store domain-relative paths; everything entering the queue —
//! caller-provided start URLs, sitemap entries, discovered links — is
//! normalised here first. URLs pointing off-domain are dropped.

use url::Url;

/// Normalises a raw URL or path into a domain-relative path.
///
/// Accepts absolute `http(s)` URLs on the job's domain (a `www.` prefix on
/// either side is tolerated) and root-relative paths. Fragments and
/// userinfo are discarded; the query string is kept because it addresses a
/// distinct cacheable resource. Returns `None` for anything off-domain or
/// unparseable.
pub fn normalize_path(raw: &str, domain: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if raw.starts_with('/') && !raw.starts_with("//") {
        let without_fragment = raw.split('#').next().unwrap_or(raw);
        return Some(without_fragment.to_string());
    }

    let parsed = Url::parse(raw).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let host = parsed.host_str()?;
    if !same_domain(host, domain) {
        return None;
    }

    let mut path = parsed.path().to_string();
    if path.is_empty() {
        path = "/".to_string();
    }
    if let Some(query) = parsed.query() {
        path.push('?');
        path.push_str(query);
    }
    Some(path)
}

fn same_domain(host: &str, domain: &str) -> bool {
    host.eq_ignore_ascii_case(domain)
        || host
            .strip_prefix("www.")
            .is_some_and(|bare| bare.eq_ignore_ascii_case(domain))
        || domain
            .strip_prefix("www.")
            .is_some_and(|bare| bare.eq_ignore_ascii_case(host))
}

/// Applies include/exclude prefix filters to a list of paths.
///
/// With a non-empty include list, a path must start with one of the include
/// prefixes; exclude prefixes always win.
pub fn filter_paths(paths: Vec<String>, include: &[String], exclude: &[String]) -> Vec<String> {
    paths
        .into_iter()
        .filter(|path| include.is_empty() || include.iter().any(|prefix| path.starts_with(prefix.as_str())))
        .filter(|path| !exclude.iter().any(|prefix| path.starts_with(prefix.as_str())))
        .collect()
}
