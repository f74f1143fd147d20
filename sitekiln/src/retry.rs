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

//! Retry policy for transient storage errors.
//!
//! Storage operations that hit lock contention ("database is locked",
//! "busy") or dropped connections are retried with exponential backoff: up
//! to [`MAX_RETRIES`] retries, starting at [`INITIAL_DELAY`] and doubling.
//! Non-transient errors surface immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::StorageError;

/// Retries after the initial attempt.
pub const MAX_RETRIES: u32 = 3;

/// Delay before the first retry; doubles on each subsequent retry.
pub const INITIAL_DELAY: Duration = Duration::from_millis(100);

/// Runs `f`, retrying transient failures with exponential backoff.
///
/// The closure is re-invoked from scratch on each attempt, so it must not
/// hold partial state across calls. After retry exhaustion the last
/// transient error is returned.
pub async fn with_retries<T, F, Fut>(operation: &str, mut f: F) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut attempt = 0;
    let mut delay = INITIAL_DELAY;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < MAX_RETRIES => {
                attempt += 1;
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient storage error, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(error) => return Err(error),
        }
    }
}
