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

//! # Sitekiln
//!
//! A cache-warming crawl orchestrator: callers submit a domain, the system
//! enumerates the site and issues HTTP GETs through a CDN-friendly client,
//! recording cache status and latency per URL. The crate implements the job
//! and task scheduling engine at its core — a relational-database-backed
//! work queue with a multi-worker pool, per-job progress accounting and
//! at-most-one delivery to concurrent workers.
//!
//! ## Architecture
//!
//! - [`database`] — connection pooling and schema (PostgreSQL or SQLite,
//!   selected at compile time)
//! - [`dal`] — task store primitives: atomic claiming, batch enqueue,
//!   result writes, progress recompute
//! - [`writer`] — the serialized single-writer funnel for mutations
//! - [`repository`] — higher-level job/task operations with dedup and caps
//! - [`pool`] — the worker pool draining the queue
//! - [`manager`] — the job lifecycle facade
//! - [`monitor`] — completion and orphan-recovery sweeps
//!
//! The HTTP fetcher and sitemap discoverer are external collaborators,
//! injected through the traits in [`fetcher`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sitekiln::{
//!     dal::DAL, database::Database, manager::{JobManager, JobOptions},
//!     monitor::{CompletionMonitor, MonitorConfig},
//!     pool::{WorkerPool, WorkerPoolConfig}, repository::JobRepository,
//!     writer::SerializedWriter,
//! };
//!
//! let database = Database::new("warm_queue.db", 10)?;
//! database.migrate().await?;
//!
//! let dal = DAL::new(database.clone());
//! let writer = Arc::new(SerializedWriter::start(database));
//! let repo = Arc::new(JobRepository::new(dal.clone(), writer.clone()));
//! let pool = Arc::new(WorkerPool::new(
//!     dal.clone(), repo.clone(), my_fetcher, WorkerPoolConfig::default(),
//! ));
//! pool.start();
//!
//! let manager = JobManager::new(dal.clone(), repo, pool, my_discoverer);
//! let job = manager.create_job(&JobOptions {
//!     domain: "example.com".into(),
//!     ..JobOptions::default()
//! }).await?;
//! ```

pub mod dal;
pub mod database;
pub mod error;
pub mod fetcher;
pub mod manager;
pub mod models;
pub mod monitor;
pub mod pool;
pub mod repository;
pub mod retry;
pub mod urls;
pub mod writer;

pub use dal::DAL;
pub use database::Database;
pub use error::{JobError, StorageError, ValidationError};
pub use fetcher::{FetchError, FetchOutcome, Fetcher, SitemapDiscoverer};
pub use manager::{JobManager, JobOptions};
pub use models::{Job, JobStatus, SourceType, Task, TaskResult, TaskStatus};
pub use monitor::{CompletionMonitor, MonitorConfig};
pub use pool::{WorkerPool, WorkerPoolConfig};
pub use repository::JobRepository;
pub use writer::SerializedWriter;

/// Initializes process-wide logging.
///
/// `RUST_LOG` wins when set; otherwise `level` (or `info`) applies. Safe to
/// call more than once — later calls are no-ops.
pub fn init_logging(level: Option<&str>) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
