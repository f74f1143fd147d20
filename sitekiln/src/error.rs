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

//! Error types for the scheduling engine.
//!
//! Each layer has its own error enum: storage operations produce
//! [`StorageError`], option checking produces [`ValidationError`], and the
//! job manager surfaces both through [`JobError`]. Fetch-side errors live in
//! [`crate::fetcher::FetchError`] because their classification (retryable vs
//! permanent) belongs to the external collaborator contract.

use thiserror::Error;

/// Errors produced by the task store and the serialized writer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to check a connection out of the pool.
    #[error("connection pool error: {0}")]
    ConnectionPool(String),

    /// An underlying Diesel query or transaction failed.
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// The blocking database interaction panicked or was aborted.
    #[error("database interaction failed: {0}")]
    Interact(String),

    /// Embedded migrations could not be applied.
    #[error("migration failed: {0}")]
    Migration(String),

    /// The connection string matched no enabled backend.
    #[error("unrecognised database url: {0}")]
    UnsupportedUrl(String),

    /// The operation was cancelled before it ran.
    #[error("operation cancelled")]
    Cancelled,

    /// The serialized writer has shut down and no longer accepts work.
    #[error("serialized writer is stopped")]
    WriterStopped,
}

impl StorageError {
    /// Whether the error is worth retrying with backoff.
    ///
    /// Lock timeouts, busy databases and reset connections clear up on their
    /// own; everything else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::ConnectionPool(_) => true,
            StorageError::Database(diesel::result::Error::DatabaseError(_, info)) => {
                let message = info.message();
                message.contains("database is locked")
                    || message.contains("busy")
                    || message.contains("connection reset")
            }
            _ => false,
        }
    }
}

/// Rejections raised while checking job options before any state mutation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("domain is required")]
    MissingDomain,

    #[error("invalid domain: {0}")]
    InvalidDomain(String),

    #[error("concurrency must be between 1 and {max}, got {got}")]
    InvalidConcurrency { got: i32, max: i32 },

    #[error("max_depth must be non-negative, got {0}")]
    InvalidMaxDepth(i32),

    #[error("max_pages must be non-negative, got {0}")]
    InvalidMaxPages(i32),
}

/// Errors surfaced by the job manager facade.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("job not found: {0}")]
    NotFound(String),

    /// The job exists but is not in a state the operation accepts.
    #[error("job {id} is not {expected}: {actual}")]
    InvalidState {
        id: String,
        expected: &'static str,
        actual: String,
    },
}
