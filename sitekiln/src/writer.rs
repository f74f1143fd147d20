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

//! Single-writer funnel for mutating database operations.
//!
//! The storage engine degrades badly under many concurrent writers, so all
//! enqueues, result writes and progress recomputes flow through one
//! background executor: callers submit a closure plus a cancellation token,
//! the executor runs units in FIFO order, each inside its own transaction,
//! and replies over a oneshot channel. Intake is bounded; callers submitting
//! while the queue is full wait for space or for their token.
//!
//! Task claiming does NOT go through this funnel — claims are read-plus-
//! update operations with row locking and must run in parallel across
//! workers (see [`crate::dal::TaskDAL::claim_next_pending`]).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use diesel::Connection;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::database::{Database, DbConnection};
use crate::error::StorageError;
use crate::retry;

/// Maximum number of units waiting in the intake queue.
pub const INTAKE_CAPACITY: usize = 50;

/// How long `stop` waits for outstanding units to drain.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

type WriteOp = Arc<dyn Fn(&mut DbConnection) -> diesel::QueryResult<()> + Send + Sync>;

struct WriteUnit {
    op: WriteOp,
    cancel: CancellationToken,
    reply: oneshot::Sender<Result<(), StorageError>>,
}

/// Serializes mutating database operations through a single executor.
pub struct SerializedWriter {
    intake: Mutex<Option<mpsc::Sender<WriteUnit>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SerializedWriter {
    /// Launches the background executor and returns the writer handle.
    pub fn start(database: Database) -> Self {
        let (tx, rx) = mpsc::channel(INTAKE_CAPACITY);
        let handle = tokio::spawn(run_executor(database, rx));
        SerializedWriter {
            intake: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Submits a unit of work and waits for its result.
    ///
    /// The closure runs inside one transaction on the executor; commit on
    /// success, rollback on error. A unit cancelled before being picked up
    /// is discarded and the caller receives [`StorageError::Cancelled`]. If
    /// the unit is already executing, its transaction runs to completion and
    /// the result is returned as usual.
    pub async fn execute<F>(&self, cancel: &CancellationToken, op: F) -> Result<(), StorageError>
    where
        F: Fn(&mut DbConnection) -> diesel::QueryResult<()> + Send + Sync + 'static,
    {
        let sender = {
            let guard = self
                .intake
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match guard.as_ref() {
                Some(sender) => sender.clone(),
                None => return Err(StorageError::WriterStopped),
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let unit = WriteUnit {
            op: Arc::new(op),
            cancel: cancel.clone(),
            reply: reply_tx,
        };

        tokio::select! {
            sent = sender.send(unit) => {
                if sent.is_err() {
                    return Err(StorageError::WriterStopped);
                }
            }
            _ = cancel.cancelled() => return Err(StorageError::Cancelled),
        }

        reply_rx.await.unwrap_or(Err(StorageError::WriterStopped))
    }

    /// Closes intake, drains outstanding units and waits up to five seconds
    /// before forcing shutdown.
    pub async fn stop(&self) {
        // Dropping the sender closes the channel; the executor drains what
        // is already queued and exits.
        {
            let mut guard = self
                .intake
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.take();
        }

        let handle = {
            let mut guard = self
                .handle
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.take()
        };

        if let Some(mut handle) = handle {
            match tokio::time::timeout(STOP_TIMEOUT, &mut handle).await {
                Ok(_) => info!("serialized writer stopped"),
                Err(_) => {
                    warn!("serialized writer stop timed out, aborting executor");
                    handle.abort();
                }
            }
        }
    }
}

async fn run_executor(database: Database, mut intake: mpsc::Receiver<WriteUnit>) {
    debug!("serialized writer executor started");

    while let Some(unit) = intake.recv().await {
        if unit.cancel.is_cancelled() {
            let _ = unit.reply.send(Err(StorageError::Cancelled));
            continue;
        }

        let op = unit.op;
        let result = retry::with_retries("serialized write", || {
            let op = op.clone();
            let database = database.clone();
            async move {
                let conn = database.get().await?;
                conn.interact(move |conn| {
                    conn.transaction(|conn| (*op)(conn)).map_err(StorageError::from)
                })
                .await
                .map_err(|e| StorageError::Interact(e.to_string()))?
            }
        })
        .await;

        if let Err(error) = &result {
            error!(error = %error, "serialized write failed");
        }
        let _ = unit.reply.send(result);
    }

    debug!("serialized writer executor drained and exited");
}
