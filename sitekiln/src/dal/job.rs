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

//! Job-level store operations.

use chrono::Utc;
use diesel::Connection;

use super::{queries, DAL};
use crate::error::StorageError;
use crate::models::{Job, NewJob};
use crate::retry;

pub struct JobDAL<'a> {
    dal: &'a DAL,
}

impl<'a> JobDAL<'a> {
    pub(super) fn new(dal: &'a DAL) -> Self {
        JobDAL { dal }
    }

    /// Inserts a new job row and returns the stored record.
    pub async fn create(&self, new_job: NewJob) -> Result<Job, StorageError> {
        let dal = self.dal;
        let id = new_job.id.clone();
        let job = retry::with_retries("create job", || {
            let new_job = new_job.clone();
            let id = id.clone();
            dal.with_conn(move |conn| {
                conn.transaction(|conn| {
                    queries::insert_job(conn, &new_job)?;
                    queries::get_job(conn, &id)
                })
                .map_err(StorageError::from)
            })
        })
        .await?;

        job.ok_or_else(|| StorageError::Interact("job vanished after insert".to_string()))
    }

    /// Returns the current snapshot of a job, or `None` if unknown.
    pub async fn get(&self, id: &str) -> Result<Option<Job>, StorageError> {
        let dal = self.dal;
        let id = id.to_string();
        retry::with_retries("get job", || {
            let id = id.clone();
            dal.with_conn(move |conn| queries::get_job(conn, &id).map_err(StorageError::from))
        })
        .await
    }

    /// Transitions a pending job to running with `started_at = now`.
    ///
    /// Returns `false` when the job was not pending (lost race or invalid
    /// state); the caller decides whether that is an error.
    pub async fn mark_running(&self, id: &str) -> Result<bool, StorageError> {
        let dal = self.dal;
        let id = id.to_string();
        let updated = retry::with_retries("mark job running", || {
            let id = id.clone();
            dal.with_conn(move |conn| {
                queries::set_job_running(conn, &id, Utc::now().naive_utc())
                    .map_err(StorageError::from)
            })
        })
        .await?;
        Ok(updated > 0)
    }

    /// Transitions a pending/running/paused job to cancelled with
    /// `completed_at = now`. Returns `false` when the job was already
    /// terminal.
    pub async fn mark_cancelled(&self, id: &str) -> Result<bool, StorageError> {
        let dal = self.dal;
        let id = id.to_string();
        let updated = retry::with_retries("mark job cancelled", || {
            let id = id.clone();
            dal.with_conn(move |conn| {
                queries::set_job_cancelled(conn, &id, Utc::now().naive_utc())
                    .map_err(StorageError::from)
            })
        })
        .await?;
        Ok(updated > 0)
    }

    /// Records a diagnostic message on the job without touching its status.
    pub async fn set_error_message(&self, id: &str, message: &str) -> Result<(), StorageError> {
        let dal = self.dal;
        let id = id.to_string();
        let message = message.to_string();
        retry::with_retries("set job error message", || {
            let id = id.clone();
            let message = message.clone();
            dal.with_conn(move |conn| {
                queries::set_job_error_message(conn, &id, &message).map_err(StorageError::from)
            })
        })
        .await
    }

    /// Recomputes the job's progress counters from its task rows.
    pub async fn recompute_progress(&self, id: &str) -> Result<(), StorageError> {
        let dal = self.dal;
        let id = id.to_string();
        retry::with_retries("recompute job progress", || {
            let id = id.clone();
            dal.with_conn(move |conn| {
                conn.transaction(|conn| {
                    queries::recompute_job_progress(conn, &id, Utc::now().naive_utc())
                })
                .map_err(StorageError::from)
            })
        })
        .await
    }

    /// Flips every running job whose counted tasks are all terminal to
    /// completed, returning the newly completed ids.
    pub async fn complete_finished(&self) -> Result<Vec<String>, StorageError> {
        let dal = self.dal;
        retry::with_retries("complete finished jobs", || {
            dal.with_conn(move |conn| {
                conn.transaction(|conn| {
                    queries::complete_finished_jobs(conn, Utc::now().naive_utc())
                })
                .map_err(StorageError::from)
            })
        })
        .await
    }
}
