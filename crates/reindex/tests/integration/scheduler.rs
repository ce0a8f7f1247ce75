/*
 *  Copyright 2025-2026 Colliery Software
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

//! Polling scheduler tests.

use std::sync::Arc;
use std::time::Duration;

use reindex::dal::JobStore;
use reindex::{InitializationSignal, JobStatus, ReindexJobWorker, SearchParameterStatus};

use crate::fixtures::{job_parameters, wait_until, TestEnv, PATIENT_BIRTHDATE};

async fn job_status(env: &TestEnv, job_id: &str) -> JobStatus {
    env.job(job_id).await.record.status
}

#[tokio::test]
async fn test_worker_runs_queued_job_after_initialization() {
    let env = TestEnv::new();
    env.patients_needing_reindex(12);
    let ctx = env.fast_context();
    let job = env.create_job(&ctx, job_parameters(5)).await;
    let job_id = job.record.id.clone();

    let signal = InitializationSignal::default();
    let worker = Arc::new(ReindexJobWorker::new(ctx, signal.clone()));
    let shutdown = worker.shutdown_token();
    let handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    // Nothing is claimed before initialization completes.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(job_status(&env, &job_id).await, JobStatus::Queued);

    signal.set();
    let jobs = env.jobs.clone();
    let id = job_id.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let jobs = jobs.clone();
            let id = id.clone();
            async move {
                jobs.get_job_by_id(&id)
                    .await
                    .map(|j| j.record.status == JobStatus::Completed)
                    .unwrap_or(false)
            }
        })
        .await
    );
    assert_eq!(env.stale_resources("Patient"), 0);
    assert_eq!(
        env.params.status_of(PATIENT_BIRTHDATE),
        Some(SearchParameterStatus::Enabled)
    );

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker should stop")
        .expect("worker panicked");
}

#[tokio::test]
async fn test_worker_applies_external_status_updates() {
    let env = TestEnv::new();
    env.patients_needing_reindex(3);
    env.params
        .stage_external_update(PATIENT_BIRTHDATE, SearchParameterStatus::PendingDisable);
    let ctx = env.fast_context();

    let signal = InitializationSignal::default();
    signal.set();
    let worker = Arc::new(ReindexJobWorker::new(ctx, signal));
    let handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    let params = env.params.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let params = params.clone();
            async move {
                params.status_of(PATIENT_BIRTHDATE) == Some(SearchParameterStatus::PendingDisable)
            }
        })
        .await
    );

    worker.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker should stop")
        .expect("worker panicked");
}

#[tokio::test]
async fn test_worker_shutdown_before_initialization() {
    let env = TestEnv::new();
    let worker = ReindexJobWorker::new(env.fast_context(), InitializationSignal::default());
    worker.shutdown();
    tokio::time::timeout(Duration::from_secs(1), worker.run())
        .await
        .expect("worker should return without initialization");
}
