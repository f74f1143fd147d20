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

//! Job repository: higher-level operations over the task store.
//!
//! Composes store primitives and enforces the queue's invariants: enqueues
//! are deduplicated and capped, and every result write is followed by a
//! progress recompute inside the same serialized-writer transaction, so the
//! counters can never be observed out of step with the task rows.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dal::{queries, DAL};
use crate::error::StorageError;
use crate::manager::JobOptions;
use crate::models::{Job, JobStatus, NewJob, NewTask, SourceType, Task, TaskResult, TaskStatus};
use crate::urls;
use crate::writer::SerializedWriter;

pub struct JobRepository {
    dal: DAL,
    writer: Arc<SerializedWriter>,
}

impl JobRepository {
    pub fn new(dal: DAL, writer: Arc<SerializedWriter>) -> Self {
        JobRepository { dal, writer }
    }

    /// Assigns an id and writes the job row with `status = pending` and a
    /// configuration snapshot of the options.
    pub async fn create_job(&self, options: &JobOptions) -> Result<Job, StorageError> {
        let new_job = NewJob {
            id: Uuid::new_v4().to_string(),
            domain: options.domain.clone(),
            status: JobStatus::Pending.as_str().to_string(),
            created_at: Utc::now().naive_utc(),
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            progress: 0.0,
            use_sitemap: options.use_sitemap,
            find_links: options.find_links,
            max_depth: options.max_depth,
            max_pages: options.max_pages,
            concurrency: options.concurrency,
            include_paths: serde_json::to_string(&options.include_paths)
                .unwrap_or_else(|_| "[]".to_string()),
            exclude_paths: serde_json::to_string(&options.exclude_paths)
                .unwrap_or_else(|_| "[]".to_string()),
        };

        let job = self.dal.jobs().create(new_job).await?;
        debug!(job_id = %job.id, domain = %job.domain, "job row created");
        Ok(job)
    }

    /// Returns the current snapshot of a job.
    pub async fn get_job(&self, id: &str) -> Result<Option<Job>, StorageError> {
        self.dal.jobs().get(id).await
    }

    /// Enqueues URLs as pending tasks for a job.
    ///
    /// URLs are normalised to domain-relative paths (off-domain entries are
    /// dropped), deduplicated against every task already recorded for the
    /// job regardless of status, and capped by the job's `max_pages`. The
    /// dedup probe is best effort: a concurrent enqueue can slip a
    /// duplicate through, which is tolerable because fetches are idempotent
    /// and progress math stays correct.
    ///
    /// Returns the number of tasks actually inserted.
    pub async fn enqueue_urls(
        &self,
        job_id: &str,
        raw_urls: &[String],
        source_type: SourceType,
        source_url: &str,
        depth: i32,
        cancel: &CancellationToken,
    ) -> Result<usize, StorageError> {
        let Some(job) = self.dal.jobs().get(job_id).await? else {
            warn!(job_id, "enqueue for unknown job, dropping URLs");
            return Ok(0);
        };

        // A job that reached a terminal state accepts no new work; late link
        // discoveries from in-flight tasks are dropped here.
        if job.job_status().is_some_and(|s| s.is_terminal()) {
            debug!(job_id, status = %job.status, "job is terminal, dropping URLs");
            return Ok(0);
        }

        let mut batch_seen = HashSet::new();
        let mut paths: Vec<String> = raw_urls
            .iter()
            .filter_map(|raw| urls::normalize_path(raw, &job.domain))
            .filter(|path| batch_seen.insert(path.clone()))
            .collect();

        let existing: HashSet<String> = self
            .dal
            .tasks()
            .existing_paths(job_id)
            .await?
            .into_iter()
            .collect();
        paths.retain(|path| !existing.contains(path));

        if job.max_pages > 0 {
            let remaining = (job.max_pages - job.total_tasks).max(0) as usize;
            if paths.len() > remaining {
                debug!(
                    job_id,
                    dropped = paths.len() - remaining,
                    max_pages = job.max_pages,
                    "page budget reached, truncating enqueue"
                );
                paths.truncate(remaining);
            }
        }

        if paths.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().naive_utc();
        let new_tasks: Vec<NewTask> = paths
            .into_iter()
            .map(|path| NewTask {
                id: Uuid::new_v4().to_string(),
                job_id: job_id.to_string(),
                page_id: None,
                path,
                depth,
                source_type: source_type.as_str().to_string(),
                source_url: source_url.to_string(),
                status: TaskStatus::Pending.as_str().to_string(),
                created_at: now,
                retry_count: 0,
            })
            .collect();

        let count = new_tasks.len();
        let job_id_owned = job_id.to_string();
        self.writer
            .execute(cancel, move |conn| {
                queries::insert_tasks_batch(conn, &job_id_owned, &new_tasks)
            })
            .await?;

        debug!(job_id, count, source = source_type.as_str(), "tasks enqueued");
        Ok(count)
    }

    /// Marks a task completed with its result fields and recomputes the
    /// job's progress, both inside one serialized transaction.
    pub async fn complete_task(
        &self,
        task: &Task,
        result: TaskResult,
        cancel: &CancellationToken,
    ) -> Result<(), StorageError> {
        let task_id = task.id.clone();
        let job_id = task.job_id.clone();
        self.writer
            .execute(cancel, move |conn| {
                let now = Utc::now().naive_utc();
                queries::mark_task_completed(conn, &task_id, &result, now)?;
                queries::recompute_job_progress(conn, &job_id, now)
            })
            .await
    }

    /// Marks a task failed and recomputes the job's progress, both inside
    /// one serialized transaction.
    pub async fn fail_task(
        &self,
        task: &Task,
        error: &str,
        status_code: Option<i32>,
        cancel: &CancellationToken,
    ) -> Result<(), StorageError> {
        let task_id = task.id.clone();
        let job_id = task.job_id.clone();
        let error = error.to_string();
        self.writer
            .execute(cancel, move |conn| {
                let now = Utc::now().naive_utc();
                queries::mark_task_failed(conn, &task_id, &error, status_code, now)?;
                queries::recompute_job_progress(conn, &job_id, now)
            })
            .await
    }

    /// Reverts a running task to pending for another attempt. Counters are
    /// untouched — the task is not terminal yet.
    ///
    /// If the owning job went terminal while the task was in flight, the
    /// task is skipped instead: requeueing it would strand a pending row
    /// nothing will ever claim.
    pub async fn retry_task(
        &self,
        task: &Task,
        error: &str,
        cancel: &CancellationToken,
    ) -> Result<(), StorageError> {
        let task_id = task.id.clone();
        let job_id = task.job_id.clone();
        let error = error.to_string();
        self.writer
            .execute(cancel, move |conn| {
                let job_terminal = queries::get_job(conn, &job_id)?
                    .and_then(|job| job.job_status())
                    .map(|status| status.is_terminal())
                    .unwrap_or(true);
                if job_terminal {
                    queries::mark_task_skipped(conn, &task_id)
                } else {
                    queries::requeue_task_for_retry(conn, &task_id, &error)
                }
            })
            .await
    }
}
