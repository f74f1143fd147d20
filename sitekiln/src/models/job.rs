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

//! Job Model
//!
//! A job is a caller-submitted crawl of one domain, composed of many tasks.
//! The row carries lifecycle state, progress accounting and a snapshot of
//! the options the job was created with.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle states of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "paused" => Some(JobStatus::Paused),
            "completed" => Some(JobStatus::Completed),
            "cancelled" => Some(JobStatus::Cancelled),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states never transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a job record in the database.
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::database::schema::jobs)]
pub struct Job {
    /// Unique identifier (UUID v4 string)
    pub id: String,
    /// Domain being crawled
    pub domain: String,
    /// Current lifecycle status, see [`JobStatus`]
    pub status: String,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    /// Total number of tasks enqueued for this job so far
    pub total_tasks: i32,
    pub completed_tasks: i32,
    pub failed_tasks: i32,
    /// Percentage of terminal tasks, in `[0, 100]`
    pub progress: f32,
    pub error_message: Option<String>,
    /// Configuration snapshot taken at creation time
    pub use_sitemap: bool,
    pub find_links: bool,
    pub max_depth: i32,
    pub max_pages: i32,
    pub concurrency: i32,
    /// JSON array of path prefixes to include
    pub include_paths: String,
    /// JSON array of path prefixes to exclude
    pub exclude_paths: String,
}

impl Job {
    /// The parsed lifecycle status. Unknown strings map to `None`.
    pub fn job_status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }

    /// Deserializes the persisted include-path list.
    pub fn include_path_list(&self) -> Vec<String> {
        serde_json::from_str(&self.include_paths).unwrap_or_default()
    }

    /// Deserializes the persisted exclude-path list.
    pub fn exclude_path_list(&self) -> Vec<String> {
        serde_json::from_str(&self.exclude_paths).unwrap_or_default()
    }
}

/// Represents a new job to be inserted into the database.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::database::schema::jobs)]
pub struct NewJob {
    pub id: String,
    pub domain: String,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub total_tasks: i32,
    pub completed_tasks: i32,
    pub failed_tasks: i32,
    pub progress: f32,
    pub use_sitemap: bool,
    pub find_links: bool,
    pub max_depth: i32,
    pub max_pages: i32,
    pub concurrency: i32,
    pub include_paths: String,
    pub exclude_paths: String,
}
