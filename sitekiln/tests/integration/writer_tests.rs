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

//! Serialized writer tests: FIFO execution, transactions, cancellation and
//! drain-on-stop.

use std::sync::{Arc, Mutex};

use diesel::prelude::*;
use tokio_util::sync::CancellationToken;

use sitekiln::database::schema::jobs;
use sitekiln::error::StorageError;
use sitekiln::writer::SerializedWriter;

use crate::fixtures::{running_job, TestFixture};

#[tokio::test]
async fn executes_units_in_fifo_order() {
    let fixture = TestFixture::new().await;
    let writer = SerializedWriter::start(fixture.database.clone());
    let order = Arc::new(Mutex::new(Vec::new()));
    let cancel = CancellationToken::new();

    for i in 0..10 {
        let order = order.clone();
        writer
            .execute(&cancel, move |_conn| {
                order.lock().unwrap().push(i);
                Ok(())
            })
            .await
            .expect("unit should succeed");
    }

    assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    writer.stop().await;
}

#[tokio::test]
async fn commits_successful_units() {
    let fixture = TestFixture::new().await;
    let writer = SerializedWriter::start(fixture.database.clone());
    let cancel = CancellationToken::new();

    let job = running_job("written", "example.com");
    writer
        .execute(&cancel, move |conn| {
            diesel::insert_into(jobs::table).values(&job).execute(conn)?;
            Ok(())
        })
        .await
        .expect("insert unit");

    let dal = fixture.dal();
    let stored = dal.jobs().get("written").await.expect("get");
    assert!(stored.is_some());
    writer.stop().await;
}

#[tokio::test]
async fn rolls_back_failed_units() {
    let fixture = TestFixture::new().await;
    let writer = SerializedWriter::start(fixture.database.clone());
    let cancel = CancellationToken::new();

    let job = running_job("phantom", "example.com");
    let result = writer
        .execute(&cancel, move |conn| {
            diesel::insert_into(jobs::table).values(&job).execute(conn)?;
            // Fail after the insert; the transaction must roll back.
            Err(diesel::result::Error::RollbackTransaction)
        })
        .await;

    assert!(matches!(result, Err(StorageError::Database(_))));

    let dal = fixture.dal();
    let stored = dal.jobs().get("phantom").await.expect("get");
    assert!(stored.is_none(), "failed unit must leave no trace");
    writer.stop().await;
}

#[tokio::test]
async fn cancelled_units_are_discarded() {
    let fixture = TestFixture::new().await;
    let writer = SerializedWriter::start(fixture.database.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let touched = Arc::new(Mutex::new(false));
    let touched_in_unit = touched.clone();
    let result = writer
        .execute(&cancel, move |_conn| {
            *touched_in_unit.lock().unwrap() = true;
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(StorageError::Cancelled)));
    assert!(!*touched.lock().unwrap(), "cancelled unit must not run");
    writer.stop().await;
}

#[tokio::test]
async fn stop_drains_outstanding_units_then_rejects_new_ones() {
    let fixture = TestFixture::new().await;
    let writer = Arc::new(SerializedWriter::start(fixture.database.clone()));
    let cancel = CancellationToken::new();

    // Queue several slow units concurrently, then stop while they drain.
    let mut submissions = Vec::new();
    for i in 0..5 {
        let writer = writer.clone();
        let cancel = cancel.clone();
        submissions.push(tokio::spawn(async move {
            let job = running_job(&format!("drained-{}", i), "example.com");
            writer
                .execute(&cancel, move |conn| {
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    diesel::insert_into(jobs::table).values(&job).execute(conn)?;
                    Ok(())
                })
                .await
        }));
    }

    // Give the submissions a moment to land in the intake queue.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    writer.stop().await;

    for submission in submissions {
        submission
            .await
            .expect("submission task panicked")
            .expect("queued unit should complete during drain");
    }

    let dal = fixture.dal();
    for i in 0..5 {
        assert!(
            dal.jobs()
                .get(&format!("drained-{}", i))
                .await
                .expect("get")
                .is_some(),
            "unit {} should have committed before shutdown",
            i
        );
    }

    let result = writer.execute(&cancel, |_conn| Ok(())).await;
    assert!(matches!(result, Err(StorageError::WriterStopped)));
}
