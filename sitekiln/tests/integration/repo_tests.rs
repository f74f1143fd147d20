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

//! Job repository tests: creation snapshots, dedup, caps and result writes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use sitekiln::manager::JobOptions;
use sitekiln::models::{SourceType, TaskResult, TaskStatus};
use sitekiln::repository::JobRepository;
use sitekiln::writer::SerializedWriter;

use crate::fixtures::TestFixture;

struct RepoHarness {
    fixture: TestFixture,
    repo: JobRepository,
    writer: Arc<SerializedWriter>,
    cancel: CancellationToken,
}

async fn repo_harness() -> RepoHarness {
    let fixture = TestFixture::new().await;
    let writer = Arc::new(SerializedWriter::start(fixture.database.clone()));
    let repo = JobRepository::new(fixture.dal(), writer.clone());
    RepoHarness {
        fixture,
        repo,
        writer,
        cancel: CancellationToken::new(),
    }
}

fn options_for(domain: &str) -> JobOptions {
    JobOptions {
        domain: domain.to_string(),
        use_sitemap: false,
        ..JobOptions::default()
    }
}

#[tokio::test]
async fn create_job_records_a_configuration_snapshot() {
    let h = repo_harness().await;

    let options = JobOptions {
        domain: "example.com".to_string(),
        find_links: true,
        max_depth: 2,
        max_pages: 40,
        concurrency: 7,
        include_paths: vec!["/blog".to_string()],
        exclude_paths: vec!["/admin".to_string()],
        ..options_for("example.com")
    };
    let job = h.repo.create_job(&options).await.expect("create");

    assert!(!job.id.is_empty());
    assert_eq!(job.domain, "example.com");
    assert_eq!(job.status, "pending");
    assert_eq!(job.total_tasks, 0);
    assert_eq!(job.progress, 0.0);
    assert!(job.find_links);
    assert_eq!(job.max_depth, 2);
    assert_eq!(job.max_pages, 40);
    assert_eq!(job.concurrency, 7);
    assert_eq!(job.include_path_list(), vec!["/blog".to_string()]);
    assert_eq!(job.exclude_path_list(), vec!["/admin".to_string()]);

    h.writer.stop().await;
}

#[tokio::test]
async fn enqueue_deduplicates_within_and_across_batches() {
    let h = repo_harness().await;
    let job = h
        .repo
        .create_job(&options_for("example.com"))
        .await
        .expect("create");

    // Duplicate inside one batch.
    let first = h
        .repo
        .enqueue_urls(
            &job.id,
            &[
                "https://example.com/a".to_string(),
                "https://example.com/a".to_string(),
                "https://example.com/b".to_string(),
            ],
            SourceType::Manual,
            "",
            0,
            &h.cancel,
        )
        .await
        .expect("enqueue");
    assert_eq!(first, 2);

    // Duplicate against an existing task, any status.
    let second = h
        .repo
        .enqueue_urls(
            &job.id,
            &["https://example.com/a".to_string(), "/c".to_string()],
            SourceType::Link,
            "https://example.com/a",
            1,
            &h.cancel,
        )
        .await
        .expect("enqueue");
    assert_eq!(second, 1);

    let job = h.repo.get_job(&job.id).await.expect("get").expect("job");
    assert_eq!(job.total_tasks, 3);

    h.writer.stop().await;
}

#[tokio::test]
async fn enqueue_drops_offsite_urls() {
    let h = repo_harness().await;
    let job = h
        .repo
        .create_job(&options_for("example.com"))
        .await
        .expect("create");

    let enqueued = h
        .repo
        .enqueue_urls(
            &job.id,
            &[
                "https://elsewhere.com/a".to_string(),
                "mailto:bee@example.com".to_string(),
                "https://www.example.com/kept".to_string(),
            ],
            SourceType::Sitemap,
            "https://example.com",
            0,
            &h.cancel,
        )
        .await
        .expect("enqueue");
    assert_eq!(enqueued, 1);

    let tasks = h
        .fixture
        .dal()
        .tasks()
        .list_for_job(&job.id)
        .await
        .expect("list");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].path, "/kept");
    assert_eq!(tasks[0].source_type, "sitemap");

    h.writer.stop().await;
}

#[tokio::test]
async fn enqueue_honours_the_page_budget() {
    let h = repo_harness().await;
    let options = JobOptions {
        max_pages: 3,
        ..options_for("example.com")
    };
    let job = h.repo.create_job(&options).await.expect("create");

    let urls: Vec<String> = (0..10)
        .map(|i| format!("https://example.com/p{}", i))
        .collect();
    let enqueued = h
        .repo
        .enqueue_urls(&job.id, &urls, SourceType::Manual, "", 0, &h.cancel)
        .await
        .expect("enqueue");
    assert_eq!(enqueued, 3);

    // The budget is spent; nothing further fits.
    let more = h
        .repo
        .enqueue_urls(
            &job.id,
            &["https://example.com/p99".to_string()],
            SourceType::Manual,
            "",
            0,
            &h.cancel,
        )
        .await
        .expect("enqueue");
    assert_eq!(more, 0);

    let job = h.repo.get_job(&job.id).await.expect("get").expect("job");
    assert_eq!(job.total_tasks, 3);

    h.writer.stop().await;
}

#[tokio::test]
async fn enqueue_rejects_terminal_jobs() {
    let h = repo_harness().await;
    let job = h
        .repo
        .create_job(&options_for("example.com"))
        .await
        .expect("create");

    let dal = h.fixture.dal();
    assert!(dal.jobs().mark_cancelled(&job.id).await.expect("cancel"));

    let enqueued = h
        .repo
        .enqueue_urls(
            &job.id,
            &["https://example.com/late".to_string()],
            SourceType::Link,
            "https://example.com/",
            1,
            &h.cancel,
        )
        .await
        .expect("enqueue");
    assert_eq!(enqueued, 0);

    let job = h.repo.get_job(&job.id).await.expect("get").expect("job");
    assert_eq!(job.total_tasks, 0);

    h.writer.stop().await;
}

#[tokio::test]
async fn complete_task_writes_results_and_updates_progress_atomically() {
    let h = repo_harness().await;
    let dal = h.fixture.dal();
    let job = h
        .repo
        .create_job(&options_for("example.com"))
        .await
        .expect("create");

    h.repo
        .enqueue_urls(
            &job.id,
            &["https://example.com/a".to_string()],
            SourceType::Manual,
            "",
            0,
            &h.cancel,
        )
        .await
        .expect("enqueue");
    assert!(dal.jobs().mark_running(&job.id).await.expect("start"));

    let task = dal
        .tasks()
        .claim_next_pending(Some(&job.id))
        .await
        .expect("claim")
        .expect("task");

    let result = TaskResult {
        status_code: Some(200),
        response_time_ms: Some(88),
        cache_status: Some("MISS".to_string()),
        content_type: Some("text/html".to_string()),
    };
    h.repo
        .complete_task(&task, result, &h.cancel)
        .await
        .expect("complete");

    let stored = dal.tasks().get(&task.id).await.expect("get").expect("task");
    assert_eq!(stored.task_status(), Some(TaskStatus::Completed));
    assert_eq!(stored.status_code, Some(200));
    assert_eq!(stored.response_time_ms, Some(88));
    assert_eq!(stored.cache_status.as_deref(), Some("MISS"));
    assert!(stored.completed_at.is_some());

    // Progress came along in the same unit.
    let job = h.repo.get_job(&job.id).await.expect("get").expect("job");
    assert_eq!(job.completed_tasks, 1);
    assert_eq!(job.status, "completed");

    h.writer.stop().await;
}

#[tokio::test]
async fn fail_task_records_error_and_counts() {
    let h = repo_harness().await;
    let dal = h.fixture.dal();
    let job = h
        .repo
        .create_job(&options_for("example.com"))
        .await
        .expect("create");

    h.repo
        .enqueue_urls(
            &job.id,
            &["https://example.com/gone".to_string()],
            SourceType::Manual,
            "",
            0,
            &h.cancel,
        )
        .await
        .expect("enqueue");
    assert!(dal.jobs().mark_running(&job.id).await.expect("start"));

    let task = dal
        .tasks()
        .claim_next_pending(Some(&job.id))
        .await
        .expect("claim")
        .expect("task");
    h.repo
        .fail_task(&task, "client error: HTTP 404", Some(404), &h.cancel)
        .await
        .expect("fail");

    let stored = dal.tasks().get(&task.id).await.expect("get").expect("task");
    assert_eq!(stored.task_status(), Some(TaskStatus::Failed));
    assert_eq!(stored.error.as_deref(), Some("client error: HTTP 404"));
    assert_eq!(stored.status_code, Some(404));

    let job = h.repo.get_job(&job.id).await.expect("get").expect("job");
    assert_eq!(job.failed_tasks, 1);
    assert_eq!(job.status, "completed", "all tasks terminal");

    h.writer.stop().await;
}
