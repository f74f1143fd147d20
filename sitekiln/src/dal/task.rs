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

//! Task-level store operations.
//!
//! Result writes (`mark_completed`, `mark_failed`, `requeue_for_retry`) are
//! normally issued through the job repository, which funnels them through
//! the serialized writer together with a progress recompute. The direct
//! variants here exist for callers that own their own sequencing — chiefly
//! the integration tests and the completion monitor.

use chrono::Utc;
use diesel::Connection;

use super::{claim, queries, DAL};
use crate::error::StorageError;
use crate::models::{NewTask, Task, TaskResult};
use crate::retry;

pub struct TaskDAL<'a> {
    dal: &'a DAL,
}

impl<'a> TaskDAL<'a> {
    pub(super) fn new(dal: &'a DAL) -> Self {
        TaskDAL { dal }
    }

    /// Atomically claims the oldest pending task, optionally restricted to
    /// one job, transitioning it to running.
    ///
    /// Uses lock-skip row locking on PostgreSQL and an IMMEDIATE transaction
    /// on SQLite, so N concurrent callers each receive distinct tasks and
    /// none blocks on a contested row. Returns `None` when no pending task
    /// exists.
    pub async fn claim_next_pending(
        &self,
        job_filter: Option<&str>,
    ) -> Result<Option<Task>, StorageError> {
        let dal = self.dal;
        let job_filter = job_filter.map(str::to_owned);
        retry::with_retries("claim next pending task", || {
            let job_filter = job_filter.clone();
            dal.with_conn(move |conn| {
                claim::claim_next_pending(conn, job_filter.as_deref(), Utc::now().naive_utc())
                    .map_err(StorageError::from)
            })
        })
        .await
    }

    /// Inserts a batch of pending tasks, bumping the job's `total_tasks` in
    /// the same transaction.
    pub async fn insert_batch(
        &self,
        job_id: &str,
        new_tasks: Vec<NewTask>,
    ) -> Result<(), StorageError> {
        let dal = self.dal;
        let job_id = job_id.to_string();
        retry::with_retries("insert task batch", || {
            let job_id = job_id.clone();
            let new_tasks = new_tasks.clone();
            dal.with_conn(move |conn| {
                conn.transaction(|conn| queries::insert_tasks_batch(conn, &job_id, &new_tasks))
                    .map_err(StorageError::from)
            })
        })
        .await
    }

    /// Paths already recorded for the job, in any status.
    pub async fn existing_paths(&self, job_id: &str) -> Result<Vec<String>, StorageError> {
        let dal = self.dal;
        let job_id = job_id.to_string();
        retry::with_retries("list task paths", || {
            let job_id = job_id.clone();
            dal.with_conn(move |conn| {
                queries::existing_task_paths(conn, &job_id).map_err(StorageError::from)
            })
        })
        .await
    }

    /// Marks a running task completed with its result fields. Callers must
    /// follow up with a progress recompute for the owning job.
    pub async fn mark_completed(
        &self,
        task_id: &str,
        result: TaskResult,
    ) -> Result<(), StorageError> {
        let dal = self.dal;
        let task_id = task_id.to_string();
        retry::with_retries("mark task completed", || {
            let task_id = task_id.clone();
            let result = result.clone();
            dal.with_conn(move |conn| {
                queries::mark_task_completed(conn, &task_id, &result, Utc::now().naive_utc())
                    .map_err(StorageError::from)
            })
        })
        .await
    }

    /// Marks a running task failed, recording the error. Callers must follow
    /// up with a progress recompute for the owning job.
    pub async fn mark_failed(
        &self,
        task_id: &str,
        error: &str,
        status_code: Option<i32>,
    ) -> Result<(), StorageError> {
        let dal = self.dal;
        let task_id = task_id.to_string();
        let error = error.to_string();
        retry::with_retries("mark task failed", || {
            let task_id = task_id.clone();
            let error = error.clone();
            dal.with_conn(move |conn| {
                queries::mark_task_failed(
                    conn,
                    &task_id,
                    &error,
                    status_code,
                    Utc::now().naive_utc(),
                )
                .map_err(StorageError::from)
            })
        })
        .await
    }

    /// Reverts a running task to pending for another attempt,
    /// incrementing its retry count.
    pub async fn requeue_for_retry(&self, task_id: &str, error: &str) -> Result<(), StorageError> {
        let dal = self.dal;
        let task_id = task_id.to_string();
        let error = error.to_string();
        retry::with_retries("requeue task for retry", || {
            let task_id = task_id.clone();
            let error = error.clone();
            dal.with_conn(move |conn| {
                queries::requeue_task_for_retry(conn, &task_id, &error).map_err(StorageError::from)
            })
        })
        .await
    }

    /// Skips all pending tasks of a job in one statement, returning how many
    /// were skipped.
    pub async fn cancel_pending(&self, job_id: &str) -> Result<usize, StorageError> {
        let dal = self.dal;
        let job_id = job_id.to_string();
        retry::with_retries("cancel pending tasks", || {
            let job_id = job_id.clone();
            dal.with_conn(move |conn| {
                queries::cancel_pending_tasks(conn, &job_id).map_err(StorageError::from)
            })
        })
        .await
    }

    /// Requeues running tasks whose `started_at` is older than `stale_after`.
    /// Orphan recovery for tasks abandoned by a dead worker.
    pub async fn requeue_stale(
        &self,
        stale_after: std::time::Duration,
    ) -> Result<usize, StorageError> {
        let dal = self.dal;
        let cutoff = Utc::now().naive_utc()
            - chrono::Duration::from_std(stale_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));
        retry::with_retries("requeue stale tasks", || {
            dal.with_conn(move |conn| {
                queries::requeue_stale_tasks(conn, cutoff).map_err(StorageError::from)
            })
        })
        .await
    }

    /// Returns a task by id.
    pub async fn get(&self, task_id: &str) -> Result<Option<Task>, StorageError> {
        let dal = self.dal;
        let task_id = task_id.to_string();
        retry::with_retries("get task", || {
            let task_id = task_id.clone();
            dal.with_conn(move |conn| queries::get_task(conn, &task_id).map_err(StorageError::from))
        })
        .await
    }

    /// Returns all tasks of a job, oldest first.
    pub async fn list_for_job(&self, job_id: &str) -> Result<Vec<Task>, StorageError> {
        let dal = self.dal;
        let job_id = job_id.to_string();
        retry::with_retries("list tasks for job", || {
            let job_id = job_id.clone();
            dal.with_conn(move |conn| {
                queries::tasks_for_job(conn, &job_id).map_err(StorageError::from)
            })
        })
        .await
    }
}
