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

//! Task Model
//!
//! A task is one URL-fetch unit of work within a job. Status transitions
//! form a DAG: `pending -> running -> {completed, failed}`,
//! `pending -> skipped` on cancel, and `running -> pending` while the retry
//! budget lasts. `completed`, exhausted `failed` and `skipped` are terminal.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle states of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "skipped" => Some(TaskStatus::Skipped),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a task's URL was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Submitted by the caller at job creation
    Manual,
    /// Listed in the domain's sitemap
    Sitemap,
    /// Found as a hyperlink on a fetched page
    Link,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Manual => "manual",
            SourceType::Sitemap => "sitemap",
            SourceType::Link => "link",
        }
    }
}

/// Represents a task record in the database.
///
/// Also derives `QueryableByName` so the PostgreSQL claim path can load the
/// row straight out of a raw `UPDATE ... RETURNING` statement.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable, Serialize)]
#[diesel(table_name = crate::database::schema::tasks)]
pub struct Task {
    pub id: String,
    pub job_id: String,
    pub page_id: Option<i32>,
    /// Path of the URL relative to the job's domain, e.g. `/pricing`
    pub path: String,
    /// Link-discovery depth; seeds are depth 0
    pub depth: i32,
    pub source_type: String,
    /// URL of the page this task was discovered on, empty for seeds
    pub source_url: String,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub retry_count: i32,
    pub error: Option<String>,
    /// Result fields written when the fetch finishes
    pub status_code: Option<i32>,
    pub response_time_ms: Option<i64>,
    pub cache_status: Option<String>,
    pub content_type: Option<String>,
}

impl Task {
    pub fn task_status(&self) -> Option<TaskStatus> {
        TaskStatus::parse(&self.status)
    }

    /// Rebuilds the absolute URL for this task against the job's domain.
    pub fn url(&self, domain: &str) -> String {
        format!("https://{}{}", domain, self.path)
    }
}

/// Represents a new task to be inserted into the database.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::database::schema::tasks)]
pub struct NewTask {
    pub id: String,
    pub job_id: String,
    pub page_id: Option<i32>,
    pub path: String,
    pub depth: i32,
    pub source_type: String,
    pub source_url: String,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub retry_count: i32,
}

/// Result fields recorded when a fetch completes.
#[derive(Debug, Clone, Default)]
pub struct TaskResult {
    pub status_code: Option<i32>,
    pub response_time_ms: Option<i64>,
    pub cache_status: Option<String>,
    pub content_type: Option<String>,
}
