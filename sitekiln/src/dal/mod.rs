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

//! Data Access Layer over the task store.
//!
//! The [`DAL`] struct hands out per-entity accessors ([`JobDAL`],
//! [`TaskDAL`]) that run primitive operations with transient-error retries.
//! Multi-statement primitives open their own transaction; the serialized
//! writer composes the same primitives (via [`queries`]) into larger
//! transactional units instead.

pub(crate) mod claim;
pub(crate) mod queries;

mod job;
mod task;

pub use job::JobDAL;
pub use task::TaskDAL;

use crate::database::{Database, DbConnection};
use crate::error::StorageError;

/// Entry point for database operations.
///
/// `DAL` is `Clone` and cheap to pass around; every clone shares the same
/// connection pool.
#[derive(Clone, Debug)]
pub struct DAL {
    pub(crate) database: Database,
}

impl DAL {
    pub fn new(database: Database) -> Self {
        DAL { database }
    }

    /// Returns a reference to the underlying database.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Returns a job DAL for job-level operations.
    pub fn jobs(&self) -> JobDAL<'_> {
        JobDAL::new(self)
    }

    /// Returns a task DAL for task-level operations.
    pub fn tasks(&self) -> TaskDAL<'_> {
        TaskDAL::new(self)
    }

    /// Runs a blocking closure on a pooled connection.
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut DbConnection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.database.get().await?;
        conn.interact(f)
            .await
            .map_err(|e| StorageError::Interact(e.to_string()))?
    }
}
