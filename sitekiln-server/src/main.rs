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

//! Server entry point: wires the scheduling engine to its HTTP surface.

mod config;
mod fetcher;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sitekiln::{
    dal::DAL, database::Database, manager::JobManager, monitor::CompletionMonitor,
    monitor::MonitorConfig, pool::WorkerPool, pool::WorkerPoolConfig,
    repository::JobRepository, writer::SerializedWriter,
};

use config::Config;
use fetcher::{CdnFetcher, SitemapClient};
use routes::AppState;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const DB_POOL_SIZE: u32 = 10;

fn setup_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    if config.env.is_development() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Fatal configuration problems exit non-zero before anything starts.
    let config = Config::from_env().context("Failed to load configuration")?;
    setup_logging(&config);

    info!(port = config.port, env = ?config.env, "starting sitekiln server");

    let database = Database::new(&config.connection_string(), DB_POOL_SIZE)
        .context("Failed to open database")?;
    database
        .migrate()
        .await
        .context("Failed to run database migrations")?;
    info!("database ready");

    let dal = DAL::new(database.clone());
    let writer = Arc::new(SerializedWriter::start(database.clone()));
    let repo = Arc::new(JobRepository::new(dal.clone(), writer.clone()));

    let warm_fetcher =
        Arc::new(CdnFetcher::new(FETCH_TIMEOUT).context("Failed to build HTTP client")?);
    let sitemap_client =
        Arc::new(SitemapClient::new(FETCH_TIMEOUT).context("Failed to build sitemap client")?);

    let pool = Arc::new(WorkerPool::new(
        dal.clone(),
        repo.clone(),
        warm_fetcher,
        WorkerPoolConfig::default(),
    ));
    pool.start();

    let manager = JobManager::new(dal.clone(), repo, pool.clone(), sitemap_client);

    let monitor = CompletionMonitor::new(dal, MonitorConfig::default());
    monitor.start();

    let state = AppState {
        manager: manager.clone(),
    };
    let app = routes::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("shutting down");
    manager.shutdown();
    pool.stop().await;
    monitor.stop().await;
    writer.stop().await;
    info!("server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
