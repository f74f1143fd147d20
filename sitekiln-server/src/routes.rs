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

//! HTTP routes: job submission, job status and liveness.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use sitekiln::{JobError, JobManager, JobOptions};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<JobManager>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/site", post(create_site_job))
        .route("/job-status", get(job_status))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "OK",
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
struct SiteParams {
    domain: Option<String>,
    max: Option<i32>,
    find_links: Option<bool>,
    sitemap: Option<bool>,
    concurrency: Option<i32>,
}

async fn create_site_job(
    State(state): State<AppState>,
    Query(params): Query<SiteParams>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let domain = params
        .domain
        .filter(|d| !d.is_empty())
        .ok_or((StatusCode::BAD_REQUEST, "domain parameter is required".to_string()))?;

    let max_pages = match params.max {
        Some(max) if max < 1 => {
            return Err((StatusCode::BAD_REQUEST, "invalid max parameter".to_string()));
        }
        Some(max) => max,
        None => 0,
    };

    let options = JobOptions {
        domain,
        use_sitemap: params.sitemap.unwrap_or(true),
        find_links: params.find_links.unwrap_or(false),
        max_pages,
        concurrency: params.concurrency.unwrap_or(5),
        ..JobOptions::default()
    };

    let job = state
        .manager
        .create_job(&options)
        .await
        .map_err(map_job_error)?;

    // Sitemap-driven jobs are started by the ingestion task once URLs are
    // in; everything else is ready to run now.
    if !options.use_sitemap {
        if let Err(error) = state.manager.start_job(&job.id).await {
            error!(job_id = %job.id, error = %error, "failed to start job");
        }
    }

    Ok(Json(json!({
        "status": "OK",
        "job_id": job.id,
        "domain": job.domain,
        "use_sitemap": options.use_sitemap,
        "find_links": options.find_links,
        "concurrency": options.concurrency,
        "max_pages": max_pages,
    })))
}

#[derive(Debug, Deserialize)]
struct JobStatusParams {
    job_id: Option<String>,
}

async fn job_status(
    State(state): State<AppState>,
    Query(params): Query<JobStatusParams>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let job_id = params
        .job_id
        .filter(|id| !id.is_empty())
        .ok_or((StatusCode::BAD_REQUEST, "job_id parameter required".to_string()))?;

    let job = state
        .manager
        .get_job_status(&job_id)
        .await
        .map_err(map_job_error)?;

    Ok(Json(json!({
        "job_id": job.id,
        "status": job.status,
        "total": job.total_tasks,
        "completed": job.completed_tasks,
        "failed": job.failed_tasks,
        "progress": job.progress,
    })))
}

fn map_job_error(error: JobError) -> (StatusCode, String) {
    match &error {
        JobError::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
        JobError::NotFound(_) => (StatusCode::NOT_FOUND, "Job not found".to_string()),
        JobError::InvalidState { .. } => (StatusCode::CONFLICT, error.to_string()),
        JobError::Storage(e) => {
            error!(error = %e, "storage error serving request");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            )
        }
    }
}
