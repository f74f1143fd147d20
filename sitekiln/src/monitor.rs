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

//! Completion monitor: periodic sweeps over the job table.
//!
//! Every tick flips running jobs whose counted tasks are all terminal to
//! completed, and requeues tasks orphaned in the running state by a dead
//! worker. Both sweeps are idempotent and safe to run concurrently with
//! workers: the completion predicate is monotone (counts only grow while a
//! job is running), so a double flip is harmless.

use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dal::DAL;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Sweep period
    pub period: Duration,
    /// A running task older than this is considered orphaned and requeued
    pub stale_after: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(5),
            stale_after: Duration::from_secs(600),
        }
    }
}

/// Background ticker that detects finished jobs and orphaned tasks.
pub struct CompletionMonitor {
    dal: DAL,
    config: MonitorConfig,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CompletionMonitor {
    pub fn new(dal: DAL, config: MonitorConfig) -> Self {
        CompletionMonitor {
            dal,
            config,
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Launches the sweep loop.
    pub fn start(&self) {
        let dal = self.dal.clone();
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                match dal.jobs().complete_finished().await {
                    Ok(completed) => {
                        for job_id in &completed {
                            info!(job_id = %job_id, "job marked as completed");
                        }
                    }
                    Err(error) => {
                        error!(error = %error, "failed to sweep finished jobs");
                    }
                }

                match dal.tasks().requeue_stale(config.stale_after).await {
                    Ok(0) => {}
                    Ok(requeued) => {
                        warn!(requeued, "requeued stale running tasks");
                    }
                    Err(error) => {
                        error!(error = %error, "failed to requeue stale tasks");
                    }
                }
            }

            debug!("completion monitor exited");
        });

        let mut guard = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(handle);
    }

    /// Stops the sweep loop.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = {
            let mut guard = self
                .handle
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
