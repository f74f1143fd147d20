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

//! Job manager: the external facade for job lifecycle operations.
//!
//! Creates jobs from validated options, seeds their initial tasks (caller
//! URLs, sitemap ingestion or the domain root), starts and cancels them,
//! and answers status queries. Sitemap ingestion runs as a detached task
//! whose cancellation is tied to the job — not to whichever caller
//! triggered the creation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::dal::DAL;
use crate::error::{JobError, ValidationError};
use crate::fetcher::SitemapDiscoverer;
use crate::models::{Job, JobStatus, SourceType};
use crate::pool::WorkerPool;
use crate::repository::JobRepository;
use crate::urls;

const MAX_CONCURRENCY: i32 = 50;

/// Options for creating a new crawl job.
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Domain to crawl, e.g. `example.com`
    pub domain: String,
    /// Explicit URLs to seed the job with; overrides sitemap discovery
    pub start_urls: Vec<String>,
    /// Discover seeds from the domain's sitemap when no start URLs given
    pub use_sitemap: bool,
    /// Enqueue links discovered on fetched pages
    pub find_links: bool,
    /// Maximum link-discovery depth; seeds are depth 0
    pub max_depth: i32,
    /// Upper bound on tasks per job; 0 means unlimited
    pub max_pages: i32,
    /// Requested crawl concurrency, recorded on the job snapshot
    pub concurrency: i32,
    /// Path prefixes to include (empty means all)
    pub include_paths: Vec<String>,
    /// Path prefixes to exclude
    pub exclude_paths: Vec<String>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            domain: String::new(),
            start_urls: Vec::new(),
            use_sitemap: true,
            find_links: false,
            max_depth: 1,
            max_pages: 0,
            concurrency: 5,
            include_paths: Vec::new(),
            exclude_paths: Vec::new(),
        }
    }
}

impl JobOptions {
    /// Checks the options; rejected jobs mutate no state.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.domain.is_empty() {
            return Err(ValidationError::MissingDomain);
        }
        if self.domain.contains("://")
            || self.domain.contains('/')
            || self.domain.contains(char::is_whitespace)
        {
            return Err(ValidationError::InvalidDomain(self.domain.clone()));
        }
        if self.concurrency < 1 || self.concurrency > MAX_CONCURRENCY {
            return Err(ValidationError::InvalidConcurrency {
                got: self.concurrency,
                max: MAX_CONCURRENCY,
            });
        }
        if self.max_depth < 0 {
            return Err(ValidationError::InvalidMaxDepth(self.max_depth));
        }
        if self.max_pages < 0 {
            return Err(ValidationError::InvalidMaxPages(self.max_pages));
        }
        Ok(())
    }
}

/// Facade over job creation and lifecycle management.
pub struct JobManager {
    dal: DAL,
    repo: Arc<JobRepository>,
    pool: Arc<WorkerPool>,
    sitemap: Arc<dyn SitemapDiscoverer>,
    /// Parent of every sitemap-ingestion token; cancelled on shutdown.
    root_cancel: CancellationToken,
    /// Live sitemap ingestion tasks by job id.
    sitemap_tasks: Mutex<HashMap<String, CancellationToken>>,
}

impl JobManager {
    pub fn new(
        dal: DAL,
        repo: Arc<JobRepository>,
        pool: Arc<WorkerPool>,
        sitemap: Arc<dyn SitemapDiscoverer>,
    ) -> Arc<Self> {
        Arc::new(JobManager {
            dal,
            repo,
            pool,
            sitemap,
            root_cancel: CancellationToken::new(),
            sitemap_tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Creates a new job and seeds its initial tasks.
    ///
    /// - explicit `start_urls` are enqueued as `manual` seeds;
    /// - otherwise, with `use_sitemap`, sitemap ingestion is spawned
    ///   asynchronously and the job starts once it finishes;
    /// - otherwise the domain root is enqueued.
    pub async fn create_job(self: &Arc<Self>, options: &JobOptions) -> Result<Job, JobError> {
        options.validate()?;

        let job = self.repo.create_job(options).await?;
        info!(
            job_id = %job.id,
            domain = %job.domain,
            use_sitemap = options.use_sitemap,
            find_links = options.find_links,
            max_depth = options.max_depth,
            "created new job"
        );

        if !options.start_urls.is_empty() {
            let paths: Vec<String> = options
                .start_urls
                .iter()
                .filter_map(|raw| urls::normalize_path(raw, &job.domain))
                .collect();
            let paths =
                urls::filter_paths(paths, &options.include_paths, &options.exclude_paths);
            self.repo
                .enqueue_urls(&job.id, &paths, SourceType::Manual, "", 0, &self.root_cancel)
                .await?;
        } else if options.use_sitemap {
            let token = self.root_cancel.child_token();
            {
                let mut tasks = self
                    .sitemap_tasks
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                tasks.insert(job.id.clone(), token.clone());
            }
            let manager = Arc::clone(self);
            let job_id = job.id.clone();
            let domain = job.domain.clone();
            tokio::spawn(async move {
                manager.process_sitemap(job_id, domain, token).await;
            });
        } else {
            let root = vec![format!("https://{}", job.domain)];
            self.repo
                .enqueue_urls(&job.id, &root, SourceType::Manual, "", 0, &self.root_cancel)
                .await?;
        }

        // Seeding bumps total_tasks; hand back a fresh snapshot.
        Ok(self.repo.get_job(&job.id).await?.unwrap_or(job))
    }

    /// Starts a pending job: flips it to running and adds it to the worker
    /// pool's active set.
    pub async fn start_job(&self, job_id: &str) -> Result<Job, JobError> {
        let job = self.get_job_status(job_id).await?;

        if job.job_status() != Some(JobStatus::Pending) {
            return Err(JobError::InvalidState {
                id: job_id.to_string(),
                expected: "pending",
                actual: job.status,
            });
        }

        if !self.dal.jobs().mark_running(job_id).await? {
            // Lost a race with another caller.
            let job = self.get_job_status(job_id).await?;
            return Err(JobError::InvalidState {
                id: job_id.to_string(),
                expected: "pending",
                actual: job.status,
            });
        }

        self.pool.add_job(job_id);
        info!(job_id, "started job");

        self.get_job_status(job_id).await
    }

    /// Cancels a pending, running or paused job.
    ///
    /// Pending tasks are skipped in one statement; tasks already running
    /// finish naturally and their result writes do not revive the job's
    /// terminal status.
    pub async fn cancel_job(&self, job_id: &str) -> Result<Job, JobError> {
        let job = self.get_job_status(job_id).await?;

        let cancellable = matches!(
            job.job_status(),
            Some(JobStatus::Pending) | Some(JobStatus::Running) | Some(JobStatus::Paused)
        );
        if !cancellable {
            return Err(JobError::InvalidState {
                id: job_id.to_string(),
                expected: "pending, running or paused",
                actual: job.status,
            });
        }

        if !self.dal.jobs().mark_cancelled(job_id).await? {
            let job = self.get_job_status(job_id).await?;
            return Err(JobError::InvalidState {
                id: job_id.to_string(),
                expected: "pending, running or paused",
                actual: job.status,
            });
        }

        self.pool.remove_job(job_id);

        // Stop a sitemap ingestion that may still be feeding the job.
        let token = {
            let mut tasks = self
                .sitemap_tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            tasks.remove(job_id)
        };
        if let Some(token) = token {
            token.cancel();
        }

        let skipped = self.dal.tasks().cancel_pending(job_id).await?;
        info!(job_id, skipped, "cancelled job");

        self.get_job_status(job_id).await
    }

    /// Returns the current snapshot of a job.
    pub async fn get_job_status(&self, job_id: &str) -> Result<Job, JobError> {
        self.dal
            .jobs()
            .get(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// Cancels every outstanding sitemap ingestion. Call on shutdown.
    pub fn shutdown(&self) {
        self.root_cancel.cancel();
    }

    /// Discovers sitemap URLs for a freshly created job, enqueues them and
    /// starts the job. Runs detached from the caller that created the job;
    /// only job cancellation (or manager shutdown) aborts it.
    async fn process_sitemap(&self, job_id: String, domain: String, cancel: CancellationToken) {
        info!(job_id = %job_id, domain = %domain, "starting sitemap processing");

        let base_url = format!("https://{}", domain);
        let discovered = tokio::select! {
            result = self.sitemap.discover(&base_url, &cancel) => result,
            _ = cancel.cancelled() => {
                info!(job_id = %job_id, "sitemap processing cancelled");
                return;
            }
        };

        let urls_found = match discovered {
            Ok(urls) => urls,
            Err(error) => {
                error!(job_id = %job_id, domain = %domain, error = %error, "failed to discover sitemaps");
                let message = format!("Failed to discover sitemaps: {}", error);
                if let Err(error) = self.dal.jobs().set_error_message(&job_id, &message).await {
                    error!(job_id = %job_id, error = %error, "failed to record sitemap error");
                }
                self.forget_sitemap_task(&job_id);
                return;
            }
        };

        let job = match self.repo.get_job(&job_id).await {
            Ok(Some(job)) => job,
            _ => {
                self.forget_sitemap_task(&job_id);
                return;
            }
        };

        let paths: Vec<String> = urls_found
            .iter()
            .filter_map(|raw| urls::normalize_path(raw, &domain))
            .collect();
        let paths = urls::filter_paths(paths, &job.include_path_list(), &job.exclude_path_list());

        if paths.is_empty() {
            warn!(job_id = %job_id, domain = %domain, "no URLs found in sitemap");
            if let Err(error) = self
                .dal
                .jobs()
                .set_error_message(&job_id, "No URLs found in sitemap")
                .await
            {
                error!(job_id = %job_id, error = %error, "failed to record sitemap warning");
            }
        } else {
            match self
                .repo
                .enqueue_urls(&job_id, &paths, SourceType::Sitemap, &base_url, 0, &cancel)
                .await
            {
                Ok(count) => {
                    info!(job_id = %job_id, url_count = count, "added sitemap URLs to job queue");
                }
                Err(error) => {
                    error!(job_id = %job_id, error = %error, "failed to enqueue sitemap URLs");
                    self.forget_sitemap_task(&job_id);
                    return;
                }
            }
        }

        // Start the job if it is still waiting on ingestion.
        match self.get_job_status(&job_id).await {
            Ok(job) if job.job_status() == Some(JobStatus::Pending) => {
                if let Err(error) = self.start_job(&job_id).await {
                    error!(job_id = %job_id, error = %error, "failed to start job after sitemap processing");
                }
            }
            _ => {}
        }

        self.forget_sitemap_task(&job_id);
    }

    fn forget_sitemap_task(&self, job_id: &str) {
        let mut tasks = self
            .sitemap_tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.remove(job_id);
    }
}
