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

//! Worker pool: N concurrent workers draining the task store.
//!
//! Each worker loops: pick an active job (round-robin), claim its oldest
//! pending task, invoke the external fetcher, report the result, and
//! enqueue any discovered links. Workers share only the active-job set —
//! a mutex-guarded list held just long enough to snapshot or mutate
//! membership, never across I/O. The pool buffers nothing in memory:
//! claim one, execute one.
//!
//! Discovered links are enqueued *before* the parent task is reported
//! complete. The parent is still `running` at that point, so the job's
//! progress cannot reach 100% while an enqueue is in flight and the
//! completion predicate never fires early.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dal::DAL;
use crate::fetcher::{FetchError, Fetcher};
use crate::models::{Job, SourceType, Task, TaskResult};
use crate::repository::JobRepository;
use crate::urls;

/// Maximum fetch attempts per task beyond the first: a retryable failure
/// requeues the task while `retry_count` stays below this.
pub const MAX_RETRIES: i32 = 3;

/// Tuning knobs for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// Retry budget for retryable fetch failures
    pub max_retries: i32,
    /// Idle sleep bounds when no active job has pending work (jittered)
    pub idle_backoff_min: Duration,
    pub idle_backoff_max: Duration,
    /// Sleep when the active-job set is empty
    pub empty_backoff: Duration,
    /// How long `stop` waits for in-flight tasks before cancelling them
    pub stop_grace: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            max_retries: MAX_RETRIES,
            idle_backoff_min: Duration::from_millis(200),
            idle_backoff_max: Duration::from_millis(500),
            empty_backoff: Duration::from_millis(500),
            stop_grace: Duration::from_secs(10),
        }
    }
}

/// A fixed-size pool of workers with a shared active-job set.
pub struct WorkerPool {
    dal: DAL,
    repo: Arc<JobRepository>,
    fetcher: Arc<dyn Fetcher>,
    config: WorkerPoolConfig,
    active_jobs: Arc<Mutex<Vec<String>>>,
    notify: Arc<Notify>,
    /// Tells worker loops to stop claiming and exit after the current task.
    shutdown: CancellationToken,
    /// Aborts in-flight fetches and pending writes once the grace period
    /// expires.
    hard_cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        dal: DAL,
        repo: Arc<JobRepository>,
        fetcher: Arc<dyn Fetcher>,
        config: WorkerPoolConfig,
    ) -> Self {
        WorkerPool {
            dal,
            repo,
            fetcher,
            config,
            active_jobs: Arc::new(Mutex::new(Vec::new())),
            notify: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            hard_cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Launches the workers.
    pub fn start(&self) {
        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for worker_id in 0..self.config.workers {
            let ctx = WorkerContext {
                worker_id,
                dal: self.dal.clone(),
                repo: self.repo.clone(),
                fetcher: self.fetcher.clone(),
                config: self.config.clone(),
                active_jobs: self.active_jobs.clone(),
                notify: self.notify.clone(),
                shutdown: self.shutdown.clone(),
                hard_cancel: self.hard_cancel.clone(),
            };
            handles.push(tokio::spawn(worker_loop(ctx)));
        }

        info!(workers = self.config.workers, "worker pool started");
    }

    /// Makes a job's tasks eligible for dispatch.
    pub fn add_job(&self, job_id: &str) {
        let mut jobs = self
            .active_jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !jobs.iter().any(|id| id == job_id) {
            jobs.push(job_id.to_string());
        }
        drop(jobs);
        self.notify.notify_waiters();
        debug!(job_id, "job added to active set");
    }

    /// Removes a job from dispatch. In-flight tasks finish naturally.
    pub fn remove_job(&self, job_id: &str) {
        let mut jobs = self
            .active_jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        jobs.retain(|id| id != job_id);
        debug!(job_id, "job removed from active set");
    }

    /// Snapshot of the active-job set.
    pub fn active_jobs(&self) -> Vec<String> {
        self.active_jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Signals shutdown and waits for workers to finish their current task
    /// within the configured grace period; whatever is still in flight
    /// after that is cancelled and its task left `running` for the stale
    /// reaper.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.notify.notify_waiters();

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self
                .handles
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.drain(..).collect()
        };

        let deadline = tokio::time::Instant::now() + self.config.stop_grace;
        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                self.hard_cancel.cancel();
                if tokio::time::timeout(Duration::from_secs(1), &mut handle)
                    .await
                    .is_err()
                {
                    warn!("worker did not stop within grace period, aborting");
                    handle.abort();
                }
            }
        }

        info!("worker pool stopped");
    }
}

struct WorkerContext {
    worker_id: usize,
    dal: DAL,
    repo: Arc<JobRepository>,
    fetcher: Arc<dyn Fetcher>,
    config: WorkerPoolConfig,
    active_jobs: Arc<Mutex<Vec<String>>>,
    notify: Arc<Notify>,
    shutdown: CancellationToken,
    hard_cancel: CancellationToken,
}

impl WorkerContext {
    fn snapshot_jobs(&self) -> Vec<String> {
        self.active_jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn drop_job(&self, job_id: &str) {
        self.active_jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|id| id != job_id);
    }
}

async fn worker_loop(ctx: WorkerContext) {
    debug!(worker = ctx.worker_id, "worker started");
    // Stagger the round-robin start so workers spread across jobs.
    let mut cursor = ctx.worker_id;

    loop {
        if ctx.shutdown.is_cancelled() {
            break;
        }

        let jobs = ctx.snapshot_jobs();
        if jobs.is_empty() {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                _ = ctx.notify.notified() => {}
                _ = tokio::time::sleep(ctx.config.empty_backoff) => {}
            }
            continue;
        }

        let mut claimed = None;
        for i in 0..jobs.len() {
            let job_id = &jobs[(cursor + i) % jobs.len()];
            match ctx.dal.tasks().claim_next_pending(Some(job_id.as_str())).await {
                Ok(Some(task)) => {
                    cursor = cursor.wrapping_add(i + 1);
                    claimed = Some(task);
                    break;
                }
                Ok(None) => continue,
                Err(error) => {
                    error!(worker = ctx.worker_id, job_id = %job_id, error = %error, "claim failed");
                    break;
                }
            }
        }

        match claimed {
            Some(task) => process_task(&ctx, task).await,
            None => {
                prune_terminal_jobs(&ctx, &jobs).await;
                let backoff = idle_backoff(&ctx.config);
                tokio::select! {
                    _ = ctx.shutdown.cancelled() => break,
                    _ = ctx.notify.notified() => {}
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }

    debug!(worker = ctx.worker_id, "worker exited");
}

fn idle_backoff(config: &WorkerPoolConfig) -> Duration {
    let min = config.idle_backoff_min.as_millis() as u64;
    let max = (config.idle_backoff_max.as_millis() as u64).max(min);
    Duration::from_millis(rand::thread_rng().gen_range(min..=max))
}

/// Drops jobs that reached a terminal state from the active set, so idle
/// workers stop polling them. Runs only on idle rounds.
async fn prune_terminal_jobs(ctx: &WorkerContext, jobs: &[String]) {
    for job_id in jobs {
        if let Ok(Some(job)) = ctx.repo.get_job(job_id).await {
            if job.job_status().is_some_and(|s| s.is_terminal()) {
                ctx.drop_job(job_id);
            }
        }
    }
}

async fn process_task(ctx: &WorkerContext, task: Task) {
    let job = match ctx.repo.get_job(&task.job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            warn!(task_id = %task.id, job_id = %task.job_id, "task for unknown job");
            report_failure(ctx, &task, "owning job no longer exists", None, false).await;
            return;
        }
        Err(error) => {
            error!(task_id = %task.id, error = %error, "failed to load job for task");
            report_failure(ctx, &task, &format!("failed to load job: {}", error), None, true)
                .await;
            return;
        }
    };

    let url = task.url(&job.domain);
    debug!(
        worker = ctx.worker_id,
        task_id = %task.id,
        url = %url,
        attempt = task.retry_count + 1,
        "executing task"
    );

    let fetch_cancel = ctx.hard_cancel.child_token();
    match ctx.fetcher.warm(&url, &fetch_cancel).await {
        Ok(outcome) if (200..400).contains(&outcome.status_code) => {
            enqueue_discovered_links(ctx, &job, &task, &url, &outcome.discovered_links).await;

            let result = TaskResult {
                status_code: Some(outcome.status_code),
                response_time_ms: Some(outcome.response_time_ms),
                cache_status: Some(outcome.cache_status.clone()),
                content_type: Some(outcome.content_type.clone()),
            };
            if let Err(error) = ctx.repo.complete_task(&task, result, &ctx.hard_cancel).await {
                error!(task_id = %task.id, error = %error, "failed to record completion");
                report_failure(
                    ctx,
                    &task,
                    &format!("failed to record completion: {}", error),
                    Some(outcome.status_code),
                    false,
                )
                .await;
            } else {
                debug!(
                    task_id = %task.id,
                    status_code = outcome.status_code,
                    cache_status = %outcome.cache_status,
                    response_time_ms = outcome.response_time_ms,
                    "task completed"
                );
            }
        }
        Ok(outcome) if outcome.status_code >= 500 => {
            // Server errors are transient as far as a crawl is concerned.
            let message = format!("server error: HTTP {}", outcome.status_code);
            report_failure(ctx, &task, &message, Some(outcome.status_code), true).await;
        }
        Ok(outcome) => {
            // 4xx (and anything below 200): the page is not coming back.
            let message = format!("client error: HTTP {}", outcome.status_code);
            report_failure(ctx, &task, &message, Some(outcome.status_code), false).await;
        }
        Err(FetchError::Cancelled) => {
            report_failure(ctx, &task, "fetch cancelled", None, false).await;
        }
        Err(error) => {
            let retryable = error.is_retryable();
            report_failure(ctx, &task, &error.to_string(), None, retryable).await;
        }
    }
}

/// Filters and enqueues links found on a successfully fetched page.
async fn enqueue_discovered_links(
    ctx: &WorkerContext,
    job: &Job,
    task: &Task,
    page_url: &str,
    links: &[String],
) {
    if !job.find_links || links.is_empty() || task.depth >= job.max_depth {
        return;
    }

    let paths: Vec<String> = links
        .iter()
        .filter_map(|link| urls::normalize_path(link, &job.domain))
        .collect();
    let filtered = urls::filter_paths(paths, &job.include_path_list(), &job.exclude_path_list());
    if filtered.is_empty() {
        return;
    }

    match ctx
        .repo
        .enqueue_urls(
            &job.id,
            &filtered,
            SourceType::Link,
            page_url,
            task.depth + 1,
            &ctx.hard_cancel,
        )
        .await
    {
        Ok(count) if count > 0 => {
            debug!(job_id = %job.id, count, depth = task.depth + 1, "discovered links enqueued");
            ctx.notify.notify_waiters();
        }
        Ok(_) => {}
        Err(error) => {
            error!(job_id = %job.id, error = %error, "failed to enqueue discovered links");
        }
    }
}

/// Records a failure outcome: requeue while the retry budget lasts for
/// retryable errors, otherwise mark the task failed.
async fn report_failure(
    ctx: &WorkerContext,
    task: &Task,
    message: &str,
    status_code: Option<i32>,
    retryable: bool,
) {
    if retryable && task.retry_count < ctx.config.max_retries {
        warn!(
            task_id = %task.id,
            retry_count = task.retry_count + 1,
            error = message,
            "task failed, requeueing for retry"
        );
        if let Err(error) = ctx.repo.retry_task(task, message, &ctx.hard_cancel).await {
            error!(task_id = %task.id, error = %error, "failed to requeue task");
        }
    } else {
        warn!(task_id = %task.id, error = message, "task failed permanently");
        if let Err(error) = ctx
            .repo
            .fail_task(task, message, status_code, &ctx.hard_cancel)
            .await
        {
            error!(task_id = %task.id, error = %error, "failed to record task failure");
        }
    }
}
