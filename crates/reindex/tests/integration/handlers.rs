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

//! Request handler tests.

use tokio_util::sync::CancellationToken;

use reindex::dal::JobStore;
use reindex::handlers::{
    CancelReindexHandler, CreateReindexHandler, GetReindexHandler, ReindexJobHandler,
};
use reindex::models::JobParameters;
use reindex::{JobStatus, ReindexError, VersionTag};

use crate::fixtures::{job_parameters, TestEnv};

#[tokio::test]
async fn test_create_applies_defaults_and_dedupes_targets() {
    let env = TestEnv::new();
    let ctx = env.fast_context();

    let created = CreateReindexHandler::new(ctx.clone())
        .handle(JobParameters {
            target_resource_types: vec![
                "Patient".to_string(),
                "Observation".to_string(),
                "Patient".to_string(),
            ],
            ..Default::default()
        })
        .await
        .unwrap();

    let record = &created.record;
    assert_eq!(record.status, JobStatus::Queued);
    assert_eq!(record.target_resource_types, vec!["Observation", "Patient"]);
    assert_eq!(record.max_concurrency, ctx.config.default_max_concurrency());
    assert_eq!(
        record.maximum_number_of_resources_per_query,
        ctx.config.max_resources_per_query()
    );
    assert_eq!(record.target_data_store_usage_percentage, None);

    let fetched = GetReindexHandler::new(ctx)
        .handle(&record.id)
        .await
        .unwrap();
    assert_eq!(fetched.version, created.version);
}

#[tokio::test]
async fn test_create_rejects_out_of_range_values() {
    let env = TestEnv::new();
    let err = CreateReindexHandler::new(env.fast_context())
        .handle(JobParameters {
            target_resource_types: vec!["NotAType".to_string()],
            max_concurrency: Some(11),
            query_delay_interval_ms: Some(500_001),
            target_data_store_usage_percentage: Some(101),
            maximum_number_of_resources_per_query: Some(0),
        })
        .await
        .unwrap_err();

    match err {
        ReindexError::Validation(issues) => {
            assert_eq!(issues.len(), 5);
            assert!(issues.iter().any(|i| i.contains("maxConcurrency")));
            assert!(issues.iter().any(|i| i.contains("NotAType")));
        }
        other => panic!("expected validation error, got {other}"),
    }
    assert!(env.jobs.is_empty());
}

#[tokio::test]
async fn test_create_rejects_second_active_job() {
    let env = TestEnv::new();
    let ctx = env.fast_context();
    let first = env.create_job(&ctx, job_parameters(10)).await;

    let err = CreateReindexHandler::new(ctx)
        .handle(JobParameters::default())
        .await
        .unwrap_err();
    match err {
        ReindexError::ActiveJobExists { job_id } => assert_eq!(job_id, first.record.id),
        other => panic!("expected active job error, got {other}"),
    }
}

#[tokio::test]
async fn test_get_missing_job_is_not_found() {
    let env = TestEnv::new();
    let err = GetReindexHandler::new(env.fast_context())
        .handle("missing")
        .await
        .unwrap_err();
    assert!(matches!(err, ReindexError::NotFound { .. }));
}

#[tokio::test]
async fn test_cancel_marks_job_and_rejects_terminal_jobs() {
    let env = TestEnv::new();
    let ctx = env.fast_context();
    let job = env.create_job(&ctx, job_parameters(10)).await;

    let canceled = CancelReindexHandler::new(ctx.clone())
        .handle(&job.record.id)
        .await
        .unwrap();
    assert_eq!(canceled.record.status, JobStatus::Canceled);
    assert!(canceled.record.canceled_time.is_some());
    assert!(canceled.record.end_time.is_some());

    let err = CancelReindexHandler::new(ctx)
        .handle(&job.record.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ReindexError::Validation(_)));
}

#[tokio::test]
async fn test_run_handler_requires_current_version() {
    let env = TestEnv::new();
    env.patients_needing_reindex(3);
    let ctx = env.fast_context();
    let job = env.create_job(&ctx, job_parameters(10)).await;

    let err = ReindexJobHandler::new(ctx.clone())
        .handle(&job.record.id, &VersionTag::new("stale"), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ReindexError::Conflict { .. }));

    let done = ReindexJobHandler::new(ctx.clone())
        .handle(&job.record.id, &job.version, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(done.record.status, JobStatus::Completed);

    // A terminal job is handed back untouched.
    let again = ReindexJobHandler::new(ctx)
        .handle(&job.record.id, &done.version, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(again.version, done.version);
    assert_eq!(
        env.jobs.get_job_by_id(&job.record.id).await.unwrap().version,
        done.version
    );
}
