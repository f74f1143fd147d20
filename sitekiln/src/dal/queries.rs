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

//! Synchronous query primitives shared by the DAL and the serialized writer.
//!
//! These functions never open transactions; the caller owns the transaction
//! boundary. The DAL wraps multi-statement primitives in a transaction of
//! their own, while the serialized writer runs a whole work unit inside one
//! transaction.

use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::database::schema::{jobs, tasks};
use crate::database::DbConnection;
use crate::models::{Job, JobStatus, NewJob, NewTask, Task, TaskResult, TaskStatus};

pub(crate) fn insert_job(conn: &mut DbConnection, job: &NewJob) -> QueryResult<()> {
    diesel::insert_into(jobs::table).values(job).execute(conn)?;
    Ok(())
}

pub(crate) fn get_job(conn: &mut DbConnection, id: &str) -> QueryResult<Option<Job>> {
    jobs::table.find(id).first(conn).optional()
}

/// Transitions a pending job to running. Returns the number of rows touched
/// so the caller can detect a lost race on the status check.
pub(crate) fn set_job_running(
    conn: &mut DbConnection,
    id: &str,
    now: NaiveDateTime,
) -> QueryResult<usize> {
    diesel::update(jobs::table.find(id))
        .filter(jobs::status.eq(JobStatus::Pending.as_str()))
        .set((
            jobs::status.eq(JobStatus::Running.as_str()),
            jobs::started_at.eq(Some(now)),
        ))
        .execute(conn)
}

pub(crate) fn set_job_cancelled(
    conn: &mut DbConnection,
    id: &str,
    now: NaiveDateTime,
) -> QueryResult<usize> {
    diesel::update(jobs::table.find(id))
        .filter(jobs::status.eq_any([
            JobStatus::Pending.as_str(),
            JobStatus::Running.as_str(),
            JobStatus::Paused.as_str(),
        ]))
        .set((
            jobs::status.eq(JobStatus::Cancelled.as_str()),
            jobs::completed_at.eq(Some(now)),
        ))
        .execute(conn)
}

pub(crate) fn set_job_error_message(
    conn: &mut DbConnection,
    id: &str,
    message: &str,
) -> QueryResult<()> {
    diesel::update(jobs::table.find(id))
        .set(jobs::error_message.eq(Some(message)))
        .execute(conn)?;
    Ok(())
}

/// Inserts a batch of pending tasks and bumps the job's `total_tasks` in the
/// same unit of work, so progress math never observes inserted-but-uncounted
/// rows. Caller must hold a transaction.
pub(crate) fn insert_tasks_batch(
    conn: &mut DbConnection,
    job_id: &str,
    new_tasks: &[NewTask],
) -> QueryResult<()> {
    if new_tasks.is_empty() {
        return Ok(());
    }

    diesel::update(jobs::table.find(job_id))
        .set(jobs::total_tasks.eq(jobs::total_tasks + new_tasks.len() as i32))
        .execute(conn)?;

    diesel::insert_into(tasks::table)
        .values(new_tasks)
        .execute(conn)?;

    Ok(())
}

/// Paths of every task recorded for the job, regardless of status. Feeds the
/// enqueue dedup probe.
pub(crate) fn existing_task_paths(
    conn: &mut DbConnection,
    job_id: &str,
) -> QueryResult<Vec<String>> {
    tasks::table
        .filter(tasks::job_id.eq(job_id))
        .select(tasks::path)
        .load(conn)
}

pub(crate) fn mark_task_completed(
    conn: &mut DbConnection,
    task_id: &str,
    result: &TaskResult,
    now: NaiveDateTime,
) -> QueryResult<()> {
    diesel::update(tasks::table.find(task_id))
        .set((
            tasks::status.eq(TaskStatus::Completed.as_str()),
            tasks::completed_at.eq(Some(now)),
            tasks::status_code.eq(result.status_code),
            tasks::response_time_ms.eq(result.response_time_ms),
            tasks::cache_status.eq(result.cache_status.as_deref()),
            tasks::content_type.eq(result.content_type.as_deref()),
        ))
        .execute(conn)?;
    Ok(())
}

pub(crate) fn mark_task_failed(
    conn: &mut DbConnection,
    task_id: &str,
    error: &str,
    status_code: Option<i32>,
    now: NaiveDateTime,
) -> QueryResult<()> {
    diesel::update(tasks::table.find(task_id))
        .set((
            tasks::status.eq(TaskStatus::Failed.as_str()),
            tasks::completed_at.eq(Some(now)),
            tasks::error.eq(Some(error)),
            tasks::status_code.eq(status_code),
        ))
        .execute(conn)?;
    Ok(())
}

/// Reverts a running task to pending for another attempt, recording the
/// error that triggered the retry.
pub(crate) fn requeue_task_for_retry(
    conn: &mut DbConnection,
    task_id: &str,
    error: &str,
) -> QueryResult<()> {
    diesel::update(tasks::table.find(task_id))
        .set((
            tasks::status.eq(TaskStatus::Pending.as_str()),
            tasks::started_at.eq(None::<NaiveDateTime>),
            tasks::retry_count.eq(tasks::retry_count + 1),
            tasks::error.eq(Some(error)),
        ))
        .execute(conn)?;
    Ok(())
}

/// Skips a single task; used when its owning job went terminal while the
/// task was in flight.
pub(crate) fn mark_task_skipped(conn: &mut DbConnection, task_id: &str) -> QueryResult<()> {
    diesel::update(tasks::table.find(task_id))
        .set(tasks::status.eq(TaskStatus::Skipped.as_str()))
        .execute(conn)?;
    Ok(())
}

/// Skips every pending task of a job in one statement.
pub(crate) fn cancel_pending_tasks(conn: &mut DbConnection, job_id: &str) -> QueryResult<usize> {
    diesel::update(tasks::table)
        .filter(tasks::job_id.eq(job_id))
        .filter(tasks::status.eq(TaskStatus::Pending.as_str()))
        .set(tasks::status.eq(TaskStatus::Skipped.as_str()))
        .execute(conn)
}

/// Returns running tasks that started before `cutoff` to pending, bumping
/// their retry count. Orphan recovery for workers that died mid-task.
pub(crate) fn requeue_stale_tasks(
    conn: &mut DbConnection,
    cutoff: NaiveDateTime,
) -> QueryResult<usize> {
    diesel::update(tasks::table)
        .filter(tasks::status.eq(TaskStatus::Running.as_str()))
        .filter(tasks::started_at.lt(cutoff))
        .set((
            tasks::status.eq(TaskStatus::Pending.as_str()),
            tasks::started_at.eq(None::<NaiveDateTime>),
            tasks::retry_count.eq(tasks::retry_count + 1),
        ))
        .execute(conn)
}

/// Recomputes a job's progress counters from its task rows.
///
/// When every counted task is terminal the job flips to completed, but only
/// from the running state: cancelled and failed jobs are never resurrected.
/// Caller must hold a transaction.
pub(crate) fn recompute_job_progress(
    conn: &mut DbConnection,
    job_id: &str,
    now: NaiveDateTime,
) -> QueryResult<()> {
    let job = match get_job(conn, job_id)? {
        Some(job) => job,
        None => return Ok(()),
    };

    let completed: i64 = tasks::table
        .filter(tasks::job_id.eq(job_id))
        .filter(tasks::status.eq(TaskStatus::Completed.as_str()))
        .count()
        .get_result(conn)?;
    let failed: i64 = tasks::table
        .filter(tasks::job_id.eq(job_id))
        .filter(tasks::status.eq(TaskStatus::Failed.as_str()))
        .count()
        .get_result(conn)?;

    let progress = if job.total_tasks > 0 {
        (completed + failed) as f32 / job.total_tasks as f32 * 100.0
    } else {
        0.0
    };

    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::completed_tasks.eq(completed as i32),
            jobs::failed_tasks.eq(failed as i32),
            jobs::progress.eq(progress),
        ))
        .execute(conn)?;

    if progress >= 100.0 {
        diesel::update(jobs::table.find(job_id))
            .filter(jobs::status.eq(JobStatus::Running.as_str()))
            .set((
                jobs::status.eq(JobStatus::Completed.as_str()),
                jobs::completed_at.eq(Some(now)),
            ))
            .execute(conn)?;
    }

    Ok(())
}

/// The completion monitor's sweep: flips every running job whose counted
/// tasks are all terminal to completed, returning the newly completed ids.
/// Caller must hold a transaction.
pub(crate) fn complete_finished_jobs(
    conn: &mut DbConnection,
    now: NaiveDateTime,
) -> QueryResult<Vec<String>> {
    let ids: Vec<String> = jobs::table
        .filter(jobs::status.eq(JobStatus::Running.as_str()))
        .filter((jobs::completed_tasks + jobs::failed_tasks).ge(jobs::total_tasks))
        .select(jobs::id)
        .load(conn)?;

    if !ids.is_empty() {
        diesel::update(jobs::table)
            .filter(jobs::id.eq_any(&ids))
            .filter(jobs::status.eq(JobStatus::Running.as_str()))
            .set((
                jobs::status.eq(JobStatus::Completed.as_str()),
                jobs::completed_at.eq(Some(now)),
            ))
            .execute(conn)?;
    }

    Ok(ids)
}

pub(crate) fn get_task(conn: &mut DbConnection, task_id: &str) -> QueryResult<Option<Task>> {
    tasks::table.find(task_id).first(conn).optional()
}

pub(crate) fn tasks_for_job(conn: &mut DbConnection, job_id: &str) -> QueryResult<Vec<Task>> {
    tasks::table
        .filter(tasks::job_id.eq(job_id))
        .order(tasks::created_at.asc())
        .load(conn)
}
