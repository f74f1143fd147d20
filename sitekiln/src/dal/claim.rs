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

//! Atomic task claiming.
//!
//! The claim is the one operation with backend-specific SQL, and it is
//! deliberately *not* funnelled through the serialized writer: claims must
//! run in parallel across workers.
//!
//! - PostgreSQL selects the oldest pending task with
//!   `FOR UPDATE SKIP LOCKED`, so concurrent claimers each lock distinct
//!   rows and never block on a contested one.
//! - SQLite has no row-level lock skipping; an IMMEDIATE transaction takes
//!   the write lock up front, which serialises concurrent claim attempts and
//!   closes the select-then-update race the same way.
//!
//! Either way, no task is ever handed to two callers.

use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::database::DbConnection;
use crate::models::Task;

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub(crate) fn claim_next_pending(
    conn: &mut DbConnection,
    job_filter: Option<&str>,
    now: NaiveDateTime,
) -> QueryResult<Option<Task>> {
    use diesel::sql_types::{Text, Timestamp};

    const CLAIM_FOR_JOB: &str = "\
        UPDATE tasks SET status = 'running', started_at = $2 \
        WHERE id = ( \
            SELECT id FROM tasks \
            WHERE status = 'pending' AND job_id = $1 \
            ORDER BY created_at ASC \
            LIMIT 1 \
            FOR UPDATE SKIP LOCKED \
        ) \
        RETURNING *";

    const CLAIM_ANY: &str = "\
        UPDATE tasks SET status = 'running', started_at = $1 \
        WHERE id = ( \
            SELECT id FROM tasks \
            WHERE status = 'pending' \
            ORDER BY created_at ASC \
            LIMIT 1 \
            FOR UPDATE SKIP LOCKED \
        ) \
        RETURNING *";

    conn.transaction(|conn| match job_filter {
        Some(job_id) => diesel::sql_query(CLAIM_FOR_JOB)
            .bind::<Text, _>(job_id)
            .bind::<Timestamp, _>(now)
            .get_result::<Task>(conn)
            .optional(),
        None => diesel::sql_query(CLAIM_ANY)
            .bind::<Timestamp, _>(now)
            .get_result::<Task>(conn)
            .optional(),
    })
}

#[cfg(all(feature = "sqlite", not(feature = "postgres")))]
pub(crate) fn claim_next_pending(
    conn: &mut DbConnection,
    job_filter: Option<&str>,
    now: NaiveDateTime,
) -> QueryResult<Option<Task>> {
    use crate::database::schema::tasks;
    use crate::models::TaskStatus;

    let job_filter = job_filter.map(str::to_owned);

    conn.immediate_transaction(|conn| {
        let mut query = tasks::table
            .filter(tasks::status.eq(TaskStatus::Pending.as_str()))
            .order(tasks::created_at.asc())
            .limit(1)
            .into_boxed();
        if let Some(job_id) = job_filter {
            query = query.filter(tasks::job_id.eq(job_id));
        }

        let candidate: Option<Task> = query.first(conn).optional()?;
        let mut task = match candidate {
            Some(task) => task,
            None => return Ok(None),
        };

        diesel::update(tasks::table.find(&task.id))
            .set((
                tasks::status.eq(TaskStatus::Running.as_str()),
                tasks::started_at.eq(Some(now)),
            ))
            .execute(conn)?;

        task.status = TaskStatus::Running.as_str().to_string();
        task.started_at = Some(now);
        Ok(Some(task))
    })
}
