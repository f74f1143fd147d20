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

//! Database connection management supporting PostgreSQL and SQLite.
//!
//! This module provides an async connection pool built on `deadpool-diesel`.
//! The backend is selected at compile time through the `postgres` / `sqlite`
//! cargo features; the rest of the crate works against the `DbConnection`
//! and `DbPool` aliases and stays backend-agnostic. The one operation with
//! backend-specific SQL is task claiming, which lives in the DAL.
//!
//! # Features
//!
//! - Connection pooling with configurable pool size
//! - Thread-safe, cheaply cloneable handle shared via constructors
//! - URL-based configuration for PostgreSQL
//! - File path, `sqlite://` URL or `:memory:` configuration for SQLite
//! - SQLite pragmas (WAL, busy timeout, foreign keys) applied to every
//!   pooled connection
//!
//! # Example
//!
//! ```rust,no_run
//! use sitekiln::database::Database;
//!
//! # fn main() -> Result<(), sitekiln::error::StorageError> {
//! let db = Database::new("warm_queue.db", 10)?;
//! # Ok(())
//! # }
//! ```

use tracing::info;

#[cfg(feature = "postgres")]
use deadpool_diesel::postgres::{
    Manager as PgManager, Pool as PgPool, Runtime as PgRuntime,
};
#[cfg(feature = "postgres")]
use diesel::PgConnection;

#[cfg(feature = "sqlite")]
use deadpool_diesel::sqlite::{
    Manager as SqliteManager, Pool as SqlitePool, Runtime as SqliteRuntime,
};
#[cfg(feature = "sqlite")]
use diesel::SqliteConnection;

use crate::error::StorageError;

/// Type alias for the connection type of the selected backend.
#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub type DbConnection = PgConnection;

#[cfg(all(feature = "sqlite", not(feature = "postgres")))]
pub type DbConnection = SqliteConnection;

/// Type alias for the connection manager of the selected backend.
#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub type DbConnectionManager = PgManager;

#[cfg(all(feature = "sqlite", not(feature = "postgres")))]
pub type DbConnectionManager = SqliteManager;

/// Type alias for the connection pool of the selected backend.
#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub type DbPool = PgPool;

#[cfg(all(feature = "sqlite", not(feature = "postgres")))]
pub type DbPool = SqlitePool;

/// A connection checked out of the pool.
#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub type DbPooledConnection = deadpool_diesel::postgres::Connection;

#[cfg(all(feature = "sqlite", not(feature = "postgres")))]
pub type DbPooledConnection = deadpool_diesel::sqlite::Connection;

/// Represents a pool of database connections.
///
/// This struct is a thin, `Clone`-able wrapper around the pool; every clone
/// references the same underlying connections. Components receive it
/// through their constructors — there is no process-wide database handle.
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Creates a new connection pool for the compiled-in backend.
    ///
    /// # Arguments
    ///
    /// * `connection_string` - `postgres://` URL for the PostgreSQL backend;
    ///   a file path, `sqlite://` URL or `:memory:` for SQLite
    /// * `max_size` - Maximum number of connections in the pool
    pub fn new(connection_string: &str, max_size: u32) -> Result<Self, StorageError> {
        #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
        {
            if !connection_string.starts_with("postgres://")
                && !connection_string.starts_with("postgresql://")
            {
                return Err(StorageError::UnsupportedUrl(connection_string.to_string()));
            }

            let manager = PgManager::new(connection_string, PgRuntime::Tokio1);
            let pool = PgPool::builder(manager)
                .max_size(max_size as usize)
                .build()
                .map_err(|e| StorageError::ConnectionPool(e.to_string()))?;

            info!(max_size, "PostgreSQL connection pool initialized");
            Ok(Self { pool })
        }

        #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
        {
            if connection_string.starts_with("postgres://")
                || connection_string.starts_with("postgresql://")
            {
                return Err(StorageError::UnsupportedUrl(connection_string.to_string()));
            }

            let connection_url = Self::build_sqlite_url(connection_string);
            let manager = SqliteManager::new(connection_url, SqliteRuntime::Tokio1);
            let pool = SqlitePool::builder(manager)
                .max_size(max_size as usize)
                .post_create(deadpool::managed::Hook::async_fn(
                    |conn: &mut deadpool_diesel::Connection<diesel::SqliteConnection>, _| {
                    Box::pin(async move {
                        conn.interact(|conn| {
                            use diesel::connection::SimpleConnection;
                            conn.batch_execute(
                                "PRAGMA journal_mode = WAL; \
                                 PRAGMA synchronous = NORMAL; \
                                 PRAGMA busy_timeout = 5000; \
                                 PRAGMA foreign_keys = ON;",
                            )
                        })
                        .await
                        .map_err(|e| deadpool::managed::HookError::Message(e.to_string().into()))?
                        .map_err(|e| deadpool::managed::HookError::Message(e.to_string().into()))?;
                        Ok(())
                    })
                }))
                .build()
                .map_err(|e| StorageError::ConnectionPool(e.to_string()))?;

            info!(max_size, "SQLite connection pool initialized");
            Ok(Self { pool })
        }
    }

    /// Checks a connection out of the pool.
    pub async fn get(&self) -> Result<DbPooledConnection, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::ConnectionPool(e.to_string()))
    }

    /// Returns a clone of the connection pool.
    pub fn pool(&self) -> DbPool {
        self.pool.clone()
    }

    /// Applies any pending embedded migrations.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        let conn = self.get().await?;
        conn.interact(super::run_migrations)
            .await
            .map_err(|e| StorageError::Interact(e.to_string()))??;
        info!("database migrations applied");
        Ok(())
    }

    /// Builds a SQLite connection path from the configured string.
    #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
    fn build_sqlite_url(connection_string: &str) -> String {
        // Strip sqlite:// prefix if present
        if let Some(path) = connection_string.strip_prefix("sqlite://") {
            path.to_string()
        } else {
            connection_string.to_string()
        }
    }
}
