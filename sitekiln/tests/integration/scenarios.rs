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

//! End-to-end scenarios: the full engine (writer, repository, worker pool,
//! manager, monitor) against a stub fetcher and a stub sitemap discoverer.

use std::sync::Arc;
use std::time::Duration;

use sitekiln::dal::DAL;
use sitekiln::manager::{JobManager, JobOptions};
use sitekiln::models::{Job, TaskStatus};
use sitekiln::monitor::{CompletionMonitor, MonitorConfig};
use sitekiln::pool::{WorkerPool, WorkerPoolConfig};
use sitekiln::repository::JobRepository;
use sitekiln::writer::SerializedWriter;

use crate::fixtures::TestFixture;
use crate::stubs::{ok, ok_with_links, StubFetcher, StubSitemap};

struct Harness {
    _fixture: TestFixture,
    dal: DAL,
    writer: Arc<SerializedWriter>,
    pool: Arc<WorkerPool>,
    manager: Arc<JobManager>,
    monitor: CompletionMonitor,
    fetcher: Arc<StubFetcher>,
}

impl Harness {
    async fn start(fetcher: StubFetcher, sitemap: StubSitemap) -> Harness {
        let fixture = TestFixture::new().await;
        let dal = fixture.dal();
        let writer = Arc::new(SerializedWriter::start(fixture.database.clone()));
        let repo = Arc::new(JobRepository::new(dal.clone(), writer.clone()));
        let fetcher = Arc::new(fetcher);

        let pool_config = WorkerPoolConfig {
            workers: 4,
            idle_backoff_min: Duration::from_millis(50),
            idle_backoff_max: Duration::from_millis(100),
            empty_backoff: Duration::from_millis(50),
            ..WorkerPoolConfig::default()
        };
        let pool = Arc::new(WorkerPool::new(
            dal.clone(),
            repo.clone(),
            fetcher.clone(),
            pool_config,
        ));
        pool.start();

        let manager = JobManager::new(dal.clone(), repo, pool.clone(), Arc::new(sitemap));

        let monitor = CompletionMonitor::new(
            dal.clone(),
            MonitorConfig {
                period: Duration::from_millis(200),
                ..MonitorConfig::default()
            },
        );
        monitor.start();

        Harness {
            _fixture: fixture,
            dal,
            writer,
            pool,
            manager,
            monitor,
            fetcher,
        }
    }

    async fn stop(self) {
        self.manager.shutdown();
        self.pool.stop().await;
        self.monitor.stop().await;
        self.writer.stop().await;
    }

    async fn wait_for_status(&self, job_id: &str, status: &str) -> Job {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
        loop {
            let job = self
                .dal
                .jobs()
                .get(job_id)
                .await
                .expect("get job")
                .expect("job exists");
            if job.status == status {
                return job;
            }
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "timed out waiting for job {} to reach {}; currently {} ({}+{}/{})",
                    job_id, status, job.status, job.completed_tasks, job.failed_tasks,
                    job.total_tasks
                );
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn wait_until<F>(&self, job_id: &str, what: &str, predicate: F) -> Job
    where
        F: Fn(&Job) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
        loop {
            let job = self
                .dal
                .jobs()
                .get(job_id)
                .await
                .expect("get job")
                .expect("job exists");
            if predicate(&job) {
                return job;
            }
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "timed out waiting for job {} ({}); currently {} ({}+{}/{})",
                    job_id, what, job.status, job.completed_tasks, job.failed_tasks,
                    job.total_tasks
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// S1 — a single explicit URL crawls to completion.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_url_job_completes() {
    let harness = Harness::start(StubFetcher::new(), StubSitemap::empty()).await;

    let job = harness
        .manager
        .create_job(&JobOptions {
            domain: "example.com".to_string(),
            start_urls: vec!["https://example.com/a".to_string()],
            use_sitemap: false,
            ..JobOptions::default()
        })
        .await
        .expect("create job");
    assert_eq!(job.total_tasks, 1);

    harness.manager.start_job(&job.id).await.expect("start job");
    let done = harness.wait_for_status(&job.id, "completed").await;

    assert_eq!(done.total_tasks, 1);
    assert_eq!(done.completed_tasks, 1);
    assert_eq!(done.failed_tasks, 0);
    assert!((done.progress - 100.0).abs() < 0.01);
    assert!(done.completed_at.is_some());

    let tasks = harness.dal.tasks().list_for_job(&job.id).await.expect("list");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].path, "/a");
    assert_eq!(tasks[0].status_code, Some(200));
    assert_eq!(tasks[0].cache_status.as_deref(), Some("HIT"));
    assert_eq!(tasks[0].response_time_ms, Some(120));

    harness.stop().await;
}

/// S2 — sitemap-driven job ingests, starts itself and completes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sitemap_driven_job_completes() {
    let sitemap = StubSitemap::with_urls(&[
        "https://example.com/x",
        "https://example.com/y",
        "https://example.com/z",
    ]);
    let harness = Harness::start(StubFetcher::new(), sitemap).await;

    let job = harness
        .manager
        .create_job(&JobOptions {
            domain: "example.com".to_string(),
            use_sitemap: true,
            ..JobOptions::default()
        })
        .await
        .expect("create job");

    // Ingestion runs detached and starts the job by itself.
    let done = harness.wait_for_status(&job.id, "completed").await;
    assert_eq!(done.total_tasks, 3);
    assert_eq!(done.completed_tasks, 3);
    assert_eq!(done.failed_tasks, 0);

    let mut paths: Vec<String> = harness
        .dal
        .tasks()
        .list_for_job(&job.id)
        .await
        .expect("list")
        .into_iter()
        .map(|t| t.path)
        .collect();
    paths.sort();
    assert_eq!(paths, vec!["/x", "/y", "/z"]);

    harness.stop().await;
}

/// S3 — link discovery enqueues depth-1 pages and stops there.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn link_discovery_respects_depth() {
    let fetcher = StubFetcher::new();
    fetcher.script("/root", vec![ok_with_links(200, &["/a", "/b"])]);
    let harness = Harness::start(fetcher, StubSitemap::empty()).await;

    let job = harness
        .manager
        .create_job(&JobOptions {
            domain: "example.com".to_string(),
            start_urls: vec!["https://example.com/root".to_string()],
            use_sitemap: false,
            find_links: true,
            max_depth: 1,
            ..JobOptions::default()
        })
        .await
        .expect("create job");

    harness.manager.start_job(&job.id).await.expect("start job");
    let done = harness.wait_for_status(&job.id, "completed").await;

    assert_eq!(done.total_tasks, 3);
    assert_eq!(done.completed_tasks, 3);

    let tasks = harness.dal.tasks().list_for_job(&job.id).await.expect("list");
    let mut depths: Vec<i32> = tasks.iter().map(|t| t.depth).collect();
    depths.sort_unstable();
    assert_eq!(depths, vec![0, 1, 1]);
    assert!(tasks.iter().all(|t| t.depth < 2));

    let link_tasks: Vec<_> = tasks.iter().filter(|t| t.source_type == "link").collect();
    assert_eq!(link_tasks.len(), 2);
    assert!(link_tasks
        .iter()
        .all(|t| t.source_url == "https://example.com/root"));

    harness.stop().await;
}

/// Links found at the depth limit are not enqueued.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn links_beyond_max_depth_are_dropped() {
    let fetcher = StubFetcher::new();
    fetcher.script("/root", vec![ok_with_links(200, &["/a"])]);
    fetcher.script("/a", vec![ok_with_links(200, &["/too-deep"])]);
    let harness = Harness::start(fetcher, StubSitemap::empty()).await;

    let job = harness
        .manager
        .create_job(&JobOptions {
            domain: "example.com".to_string(),
            start_urls: vec!["https://example.com/root".to_string()],
            use_sitemap: false,
            find_links: true,
            max_depth: 1,
            ..JobOptions::default()
        })
        .await
        .expect("create job");

    harness.manager.start_job(&job.id).await.expect("start job");
    let done = harness.wait_for_status(&job.id, "completed").await;

    assert_eq!(done.total_tasks, 2, "only /root and /a");
    let tasks = harness.dal.tasks().list_for_job(&job.id).await.expect("list");
    assert!(tasks.iter().all(|t| t.path != "/too-deep"));

    harness.stop().await;
}

/// S4 — two 503s then a 200: the task retries and completes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retryable_failures_retry_then_succeed() {
    let fetcher = StubFetcher::new();
    fetcher.script("/flaky", vec![ok(503), ok(503), ok(200)]);
    let harness = Harness::start(fetcher, StubSitemap::empty()).await;

    let job = harness
        .manager
        .create_job(&JobOptions {
            domain: "example.com".to_string(),
            start_urls: vec!["https://example.com/flaky".to_string()],
            use_sitemap: false,
            ..JobOptions::default()
        })
        .await
        .expect("create job");

    harness.manager.start_job(&job.id).await.expect("start job");
    let done = harness.wait_for_status(&job.id, "completed").await;

    assert_eq!(done.completed_tasks, 1);
    assert_eq!(done.failed_tasks, 0);

    let tasks = harness.dal.tasks().list_for_job(&job.id).await.expect("list");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_status(), Some(TaskStatus::Completed));
    assert_eq!(tasks[0].retry_count, 2);
    assert_eq!(tasks[0].status_code, Some(200));
    assert_eq!(harness.fetcher.call_count("/flaky"), 3);

    harness.stop().await;
}

/// Retryable failures stop at the retry budget and fail the task.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retry_budget_is_finite() {
    let fetcher = StubFetcher::new();
    fetcher.script("/always-down", vec![ok(503)]);
    let harness = Harness::start(fetcher, StubSitemap::empty()).await;

    let job = harness
        .manager
        .create_job(&JobOptions {
            domain: "example.com".to_string(),
            start_urls: vec!["https://example.com/always-down".to_string()],
            use_sitemap: false,
            ..JobOptions::default()
        })
        .await
        .expect("create job");

    harness.manager.start_job(&job.id).await.expect("start job");
    let done = harness.wait_for_status(&job.id, "completed").await;

    assert_eq!(done.completed_tasks, 0);
    assert_eq!(done.failed_tasks, 1);

    let tasks = harness.dal.tasks().list_for_job(&job.id).await.expect("list");
    assert_eq!(tasks[0].task_status(), Some(TaskStatus::Failed));
    assert_eq!(tasks[0].retry_count, 3);
    // Initial attempt plus three retries.
    assert_eq!(harness.fetcher.call_count("/always-down"), 4);

    harness.stop().await;
}

/// S5 — a 404 fails the task permanently; the job still completes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn permanent_failure_counts_as_failed() {
    let fetcher = StubFetcher::new();
    fetcher.script("/gone", vec![ok(404)]);
    let harness = Harness::start(fetcher, StubSitemap::empty()).await;

    let job = harness
        .manager
        .create_job(&JobOptions {
            domain: "example.com".to_string(),
            start_urls: vec![
                "https://example.com/ok".to_string(),
                "https://example.com/gone".to_string(),
            ],
            use_sitemap: false,
            ..JobOptions::default()
        })
        .await
        .expect("create job");

    harness.manager.start_job(&job.id).await.expect("start job");
    let done = harness.wait_for_status(&job.id, "completed").await;

    assert_eq!(done.total_tasks, 2);
    assert_eq!(done.completed_tasks, 1);
    assert_eq!(done.failed_tasks, 1);
    assert!((done.progress - 100.0).abs() < 0.01);

    let tasks = harness.dal.tasks().list_for_job(&job.id).await.expect("list");
    let gone = tasks.iter().find(|t| t.path == "/gone").expect("task");
    assert_eq!(gone.task_status(), Some(TaskStatus::Failed));
    assert_eq!(gone.status_code, Some(404));
    assert_eq!(gone.retry_count, 0, "4xx must not retry");
    assert_eq!(harness.fetcher.call_count("/gone"), 1);

    harness.stop().await;
}

/// S6 — cancelling mid-flight skips pending tasks and freezes the job in
/// the cancelled state while in-flight tasks finish naturally.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_mid_flight_skips_pending_work() {
    let fetcher = StubFetcher::new().with_delay(Duration::from_millis(30));
    let harness = Harness::start(fetcher, StubSitemap::empty()).await;

    let start_urls: Vec<String> = (0..100)
        .map(|i| format!("https://example.com/p{}", i))
        .collect();
    let job = harness
        .manager
        .create_job(&JobOptions {
            domain: "example.com".to_string(),
            start_urls,
            use_sitemap: false,
            ..JobOptions::default()
        })
        .await
        .expect("create job");
    assert_eq!(job.total_tasks, 100);

    harness.manager.start_job(&job.id).await.expect("start job");
    harness
        .wait_until(&job.id, "ten tasks completed", |job| {
            job.completed_tasks >= 10
        })
        .await;

    let cancelled = harness.manager.cancel_job(&job.id).await.expect("cancel");
    assert_eq!(cancelled.status, "cancelled");
    assert!(cancelled.completed_at.is_some());

    // Let in-flight tasks drain.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let tasks = harness.dal.tasks().list_for_job(&job.id).await.expect("list");
    assert!(
        tasks
            .iter()
            .all(|t| t.task_status() != Some(TaskStatus::Pending)),
        "no task may remain pending after cancel"
    );
    let skipped = tasks
        .iter()
        .filter(|t| t.task_status() == Some(TaskStatus::Skipped))
        .count();
    assert!(skipped > 0, "most of the queue should be skipped");
    assert!(
        tasks
            .iter()
            .all(|t| t.task_status() != Some(TaskStatus::Running)),
        "in-flight tasks should have finished"
    );

    // Finished stragglers never revive the job.
    let job = harness
        .dal
        .jobs()
        .get(&job.id)
        .await
        .expect("get")
        .expect("job");
    assert_eq!(job.status, "cancelled");
    assert!(job.completed_tasks >= 10);
    assert!(job.completed_tasks + job.failed_tasks <= job.total_tasks);

    harness.stop().await;
}

/// A failed sitemap discovery is recorded on the job.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sitemap_failure_is_recorded() {
    let harness = Harness::start(
        StubFetcher::new(),
        StubSitemap::failing("robots denied us"),
    )
    .await;

    let job = harness
        .manager
        .create_job(&JobOptions {
            domain: "example.com".to_string(),
            use_sitemap: true,
            ..JobOptions::default()
        })
        .await
        .expect("create job");

    let job = harness
        .wait_until(&job.id, "error recorded", |job| job.error_message.is_some())
        .await;
    assert!(job
        .error_message
        .as_deref()
        .expect("message")
        .contains("Failed to discover sitemaps"));
    assert_eq!(job.status, "pending", "ingestion failure leaves job unstarted");

    harness.stop().await;
}

/// Progress accounting holds under dynamic enqueue: every job observes
/// `completed + failed <= total` on the way to completion.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn counters_stay_consistent_during_link_discovery() {
    let fetcher = StubFetcher::new();
    fetcher.script(
        "/root",
        vec![ok_with_links(200, &["/l1", "/l2", "/l3", "/l4"])],
    );
    let harness = Harness::start(fetcher, StubSitemap::empty()).await;

    let job = harness
        .manager
        .create_job(&JobOptions {
            domain: "example.com".to_string(),
            start_urls: vec!["https://example.com/root".to_string()],
            use_sitemap: false,
            find_links: true,
            max_depth: 1,
            ..JobOptions::default()
        })
        .await
        .expect("create job");

    harness.manager.start_job(&job.id).await.expect("start job");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let job = harness
            .dal
            .jobs()
            .get(&job.id)
            .await
            .expect("get")
            .expect("job");
        assert!(
            job.completed_tasks + job.failed_tasks <= job.total_tasks,
            "invariant violated: {}+{} > {}",
            job.completed_tasks,
            job.failed_tasks,
            job.total_tasks
        );
        if job.status == "completed" {
            assert_eq!(job.total_tasks, 5);
            assert_eq!(job.completed_tasks, 5);
            break;
        }
        assert!(
            tokio::time::Instant::now() <= deadline,
            "job did not complete in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    harness.stop().await;
}
