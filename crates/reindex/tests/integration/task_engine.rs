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

//! End-to-end tests for the single-node task engine.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use reindex::dal::memory::{InMemoryFhirStore, InjectedFailure};
use reindex::dal::{JobStore, ReindexQuery, ReindexSearchResult, SearchService};
use reindex::error::StoreError;
use reindex::handlers::CancelReindexHandler;
use reindex::models::{IssueSeverity, JobParameters, QueryKey, QueryState};
use reindex::{JobStatus, ReindexContext, ReindexError, ReindexJobTask, SearchParameterStatus};

use crate::fixtures::{
    fast_config, job_parameters, wait_until, TestEnv, OBSERVATION_CODE, PATIENT_BIRTHDATE,
    PATIENT_NAME,
};

#[tokio::test]
async fn test_job_reindexes_every_type_and_advances_parameters() {
    let env = TestEnv::new();
    env.patients_needing_reindex(25);
    env.add_parameter(
        OBSERVATION_CODE,
        "code",
        &["Observation"],
        SearchParameterStatus::PendingDisable,
    );
    env.store.seed("Observation", 7);
    let ctx = env.fast_context();

    let job = env.create_job(&ctx, job_parameters(10)).await;
    let done = ReindexJobTask::new(ctx)
        .execute(job, CancellationToken::new())
        .await
        .expect("reindex job should finish");

    assert_eq!(done.record.status, JobStatus::Completed);
    assert_eq!(done.record.count, 32);
    assert_eq!(done.record.progress, 32);
    assert!(done.record.query_list.all_completed());
    assert_eq!(env.stale_resources("Patient"), 0);
    assert_eq!(env.stale_resources("Observation"), 0);
    assert_eq!(
        env.params.status_of(PATIENT_BIRTHDATE),
        Some(SearchParameterStatus::Enabled)
    );
    assert_eq!(
        env.params.status_of(OBSERVATION_CODE),
        Some(SearchParameterStatus::Disabled)
    );

    let stored = env.job(&done.record.id).await;
    assert_eq!(stored.version, done.version);
    assert_eq!(stored.record.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_reindex_preserves_resource_version_and_last_modified() {
    let env = TestEnv::new();
    env.patients_needing_reindex(3);
    let before = env.store.resources_of("Patient");
    let ctx = env.fast_context();

    let job = env.create_job(&ctx, job_parameters(10)).await;
    ReindexJobTask::new(ctx)
        .execute(job, CancellationToken::new())
        .await
        .unwrap();

    let after = env.store.resources_of("Patient");
    for (old, new) in before.iter().zip(after.iter()) {
        assert_eq!(old.version, new.version);
        assert_eq!(old.last_modified, new.last_modified);
        assert_ne!(old.search_parameter_hash, new.search_parameter_hash);
    }
}

#[tokio::test]
async fn test_parameters_advance_exactly_once() {
    let env = TestEnv::new();
    env.patients_needing_reindex(4);
    let ctx = env.fast_context();

    let job = env.create_job(&ctx, job_parameters(10)).await;
    ReindexJobTask::new(ctx.clone())
        .execute(job, CancellationToken::new())
        .await
        .unwrap();
    let history = env.params.history();
    assert_eq!(
        history,
        vec![(PATIENT_BIRTHDATE.to_string(), SearchParameterStatus::Enabled)]
    );

    // Nothing requires reindexing any more, so a second job has no work and
    // must not write statuses again.
    let second = env.create_job(&ctx, job_parameters(10)).await;
    let done = ReindexJobTask::new(ctx)
        .execute(second, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(done.record.status, JobStatus::Canceled);
    assert_eq!(env.params.history(), history);
}

#[tokio::test]
async fn test_no_parameters_for_target_type_cancels_with_information() {
    let env = TestEnv::new();
    env.add_parameter(
        OBSERVATION_CODE,
        "code",
        &["Observation"],
        SearchParameterStatus::Supported,
    );
    env.store.seed("Patient", 3);
    let ctx = env.fast_context();

    let job = env
        .create_job(
            &ctx,
            JobParameters {
                target_resource_types: vec!["Patient".to_string()],
                ..Default::default()
            },
        )
        .await;
    let done = ReindexJobTask::new(ctx)
        .execute(job, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.record.status, JobStatus::Canceled);
    assert!(done.record.query_list.is_empty());
    assert_eq!(done.record.issues.len(), 1);
    assert_eq!(done.record.issues[0].severity, IssueSeverity::Information);
    assert_eq!(env.store.write_count(), 0);
}

#[tokio::test]
async fn test_zero_resources_completes_without_work_units() {
    let env = TestEnv::new();
    env.add_parameter(
        PATIENT_BIRTHDATE,
        "birthDate",
        &["Patient"],
        SearchParameterStatus::Supported,
    );
    let ctx = env.fast_context();

    let job = env.create_job(&ctx, job_parameters(10)).await;
    let done = ReindexJobTask::new(ctx)
        .execute(job, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.record.status, JobStatus::Completed);
    assert!(done.record.query_list.is_empty());
    assert_eq!(done.record.count, 0);
    assert!(done
        .record
        .issues
        .iter()
        .any(|i| i.severity == IssueSeverity::Information));
    assert_eq!(
        env.params.status_of(PATIENT_BIRTHDATE),
        Some(SearchParameterStatus::Enabled)
    );
}

#[tokio::test]
async fn test_task_is_single_use() {
    let env = TestEnv::new();
    env.add_parameter(
        PATIENT_BIRTHDATE,
        "birthDate",
        &["Patient"],
        SearchParameterStatus::Supported,
    );
    let ctx = env.fast_context();
    let job = env.create_job(&ctx, job_parameters(10)).await;

    let task = ReindexJobTask::new(ctx);
    let done = task
        .execute(job.clone(), CancellationToken::new())
        .await
        .unwrap();
    let err = task
        .execute(done, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ReindexError::Contract(_)));
}

#[tokio::test]
async fn test_failures_below_threshold_are_retried() {
    let env = TestEnv::new();
    env.patients_needing_reindex(5);
    let ctx = env.context(fast_config().consecutive_failures_threshold(3).build());
    env.store
        .inject_failure(Some("Patient"), InjectedFailure::Timeout);
    env.store
        .inject_failure(Some("Patient"), InjectedFailure::Timeout);

    let job = env.create_job(&ctx, job_parameters(10)).await;
    let done = ReindexJobTask::new(ctx)
        .execute(job, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.record.status, JobStatus::Completed);
    assert_eq!(done.record.failure_count, 2);
    assert_eq!(done.record.consecutive_failure_count, 0);
    assert_eq!(env.stale_resources("Patient"), 0);
}

#[tokio::test]
async fn test_failures_at_threshold_fail_the_job() {
    let env = TestEnv::new();
    env.patients_needing_reindex(5);
    let ctx = env.context(fast_config().consecutive_failures_threshold(3).build());
    for _ in 0..3 {
        env.store
            .inject_failure(Some("Patient"), InjectedFailure::Timeout);
    }

    let job = env.create_job(&ctx, job_parameters(10)).await;
    let done = ReindexJobTask::new(ctx)
        .execute(job, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.record.status, JobStatus::Failed);
    assert_eq!(done.record.query_list.count(QueryState::Failed), 1);
    let issue = done.record.issues.last().expect("failure issue");
    assert_eq!(issue.severity, IssueSeverity::Error);
    assert!(issue.diagnostics.contains("Patient"));
    assert!(issue.diagnostics.contains("resubmit"));
    assert_eq!(
        env.params.status_of(PATIENT_BIRTHDATE),
        Some(SearchParameterStatus::Supported)
    );
}

/// Search service that reports leftover resources on every count after the
/// first one per type.
struct LeftoverCounts {
    inner: Arc<InMemoryFhirStore>,
    counts: AtomicUsize,
}

#[async_trait]
impl SearchService for LeftoverCounts {
    fn supports_surrogate_ordering(&self) -> bool {
        self.inner.supports_surrogate_ordering()
    }

    async fn search_for_reindex(
        &self,
        query: &ReindexQuery,
    ) -> Result<ReindexSearchResult, StoreError> {
        if query.count_only && self.counts.fetch_add(1, Ordering::SeqCst) > 0 {
            return Ok(ReindexSearchResult {
                total_count: Some(5),
                ..Default::default()
            });
        }
        self.inner.search_for_reindex(query).await
    }

    async fn get_surrogate_id_ranges(
        &self,
        resource_type: &str,
        start_id: i64,
        end_id: i64,
        range_size: u64,
    ) -> Result<Vec<(i64, i64)>, StoreError> {
        self.inner
            .get_surrogate_id_ranges(resource_type, start_id, end_id, range_size)
            .await
    }
}

#[tokio::test]
async fn test_leftover_resources_fail_the_job_with_resubmit_hint() {
    let env = TestEnv::new();
    env.patients_needing_reindex(3);
    let search = Arc::new(LeftoverCounts {
        inner: env.store.clone(),
        counts: AtomicUsize::new(0),
    });
    let ctx = ReindexContext::new(
        fast_config().build(),
        env.jobs.clone(),
        search,
        env.store.clone(),
        env.params.clone(),
        env.params.clone(),
    );

    let job = env.create_job(&ctx, job_parameters(10)).await;
    let done = ReindexJobTask::new(ctx)
        .execute(job, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.record.status, JobStatus::Failed);
    let issue = done.record.issues.last().expect("leftover issue");
    assert!(issue.diagnostics.contains("5 Patient"));
    assert!(issue.diagnostics.contains("resubmit"));
    assert_eq!(
        env.params.status_of(PATIENT_BIRTHDATE),
        Some(SearchParameterStatus::Supported)
    );
}

#[tokio::test]
async fn test_stale_version_surfaces_conflict_without_writing() {
    let env = TestEnv::new();
    env.patients_needing_reindex(5);
    let ctx = env.fast_context();
    let job = env.create_job(&ctx, job_parameters(10)).await;

    // Another instance writes the record first.
    env.jobs
        .update_job(&job.record, &job.version)
        .await
        .unwrap();

    let err = ReindexJobTask::new(ctx)
        .execute(job.clone(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ReindexError::Conflict { .. }));
    assert_eq!(env.store.write_count(), 0);
    assert_eq!(env.job(&job.record.id).await.record.status, JobStatus::Queued);
}

#[tokio::test]
async fn test_canceled_record_is_adopted() {
    let env = TestEnv::new();
    env.patients_needing_reindex(5);
    let ctx = env.fast_context();
    let job = env.create_job(&ctx, job_parameters(10)).await;

    CancelReindexHandler::new(ctx.clone())
        .handle(&job.record.id)
        .await
        .unwrap();

    let err = ReindexJobTask::new(ctx)
        .execute(job.clone(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ReindexError::Canceled));
    assert_eq!(env.store.write_count(), 0);
    assert_eq!(
        env.job(&job.record.id).await.record.status,
        JobStatus::Canceled
    );
}

#[tokio::test]
async fn test_external_cancel_stops_running_job() {
    let env = TestEnv::new();
    env.patients_needing_reindex(60);
    let ctx = env.fast_context();
    let job = env
        .create_job(
            &ctx,
            JobParameters {
                maximum_number_of_resources_per_query: Some(5),
                query_delay_interval_ms: Some(50),
                ..Default::default()
            },
        )
        .await;
    let job_id = job.record.id.clone();

    let task_ctx = ctx.clone();
    let running = tokio::spawn(async move {
        ReindexJobTask::new(task_ctx)
            .execute(job, CancellationToken::new())
            .await
    });

    let jobs = env.jobs.clone();
    let id = job_id.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let jobs = jobs.clone();
            let id = id.clone();
            async move {
                jobs.get_job_by_id(&id)
                    .await
                    .map(|j| j.record.progress > 0)
                    .unwrap_or(false)
            }
        })
        .await
    );

    CancelReindexHandler::new(ctx)
        .handle(&job_id)
        .await
        .expect("cancel should succeed");

    let result = running.await.expect("task panicked");
    assert!(matches!(result, Err(ReindexError::Canceled)));
    let stored = env.job(&job_id).await;
    assert_eq!(stored.record.status, JobStatus::Canceled);
    assert!(stored.record.canceled_time.is_some());
}

#[tokio::test]
async fn test_interrupted_job_resumes_idempotently() {
    let env = TestEnv::new();
    env.patients_needing_reindex(40);
    let ctx = env.context(
        fast_config()
            .job_heartbeat_timeout(Duration::from_millis(200))
            .build(),
    );
    let job = env
        .create_job(
            &ctx,
            JobParameters {
                maximum_number_of_resources_per_query: Some(5),
                query_delay_interval_ms: Some(30),
                ..Default::default()
            },
        )
        .await;
    let job_id = job.record.id.clone();

    // First instance stops partway through.
    let stop = CancellationToken::new();
    let first_ctx = ctx.clone();
    let first_stop = stop.clone();
    let first = tokio::spawn(async move {
        ReindexJobTask::new(first_ctx)
            .execute(job, first_stop)
            .await
    });
    let jobs = env.jobs.clone();
    let id = job_id.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let jobs = jobs.clone();
            let id = id.clone();
            async move {
                jobs.get_job_by_id(&id)
                    .await
                    .map(|j| j.record.progress >= 10)
                    .unwrap_or(false)
            }
        })
        .await
    );
    stop.cancel();
    assert!(matches!(
        first.await.expect("task panicked"),
        Err(ReindexError::Canceled)
    ));
    let interrupted = env.job(&job_id).await;
    assert_eq!(interrupted.record.status, JobStatus::Running);
    assert!(env.stale_resources("Patient") > 0);

    // Second instance claims the job once its heartbeat is stale.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let claimed = env
        .jobs
        .acquire_jobs(1, Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    let done = ReindexJobTask::new(ctx)
        .execute(claimed.into_iter().next().unwrap(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.record.status, JobStatus::Completed);
    assert_eq!(env.stale_resources("Patient"), 0);
    assert!(done.record.progress <= done.record.count);
    assert!(done.record.progress >= interrupted.record.progress);
    assert_eq!(
        env.params
            .history()
            .iter()
            .filter(|(url, _)| url == PATIENT_BIRTHDATE)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_stale_running_unit_is_requeued() {
    let env = TestEnv::new();
    env.patients_needing_reindex(5);
    env.add_parameter(
        PATIENT_NAME,
        "name",
        &["Patient"],
        SearchParameterStatus::Enabled,
    );
    let ctx = env.context(
        fast_config()
            .job_heartbeat_timeout(Duration::from_millis(200))
            .build(),
    );
    let job = env.create_job(&ctx, job_parameters(10)).await;

    // A crashed instance initialized the job and left its only unit running.
    let old = Utc::now() - chrono::Duration::seconds(10);
    let mut record = job.record.clone();
    record.mark_running(old);
    record.search_parameter_urls.insert(PATIENT_BIRTHDATE.to_string());
    record.resource_types.insert("Patient".to_string());
    record
        .resource_type_search_parameter_hashes
        .insert("Patient".to_string(), env.current_hash("Patient"));
    record.count = 5;
    let key = QueryKey::new("Patient", None);
    record.query_list.add_queued(key.clone(), old);
    record.query_list.mark_running(&key, old);
    env.jobs.update_job(&record, &job.version).await.unwrap();
    env.jobs.set_heartbeat(&record.id, old);

    let claimed = env
        .jobs
        .acquire_jobs(1, Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    let done = ReindexJobTask::new(ctx)
        .execute(claimed.into_iter().next().unwrap(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.record.status, JobStatus::Completed);
    assert_eq!(done.record.progress, 5);
    assert_eq!(env.stale_resources("Patient"), 0);
    // Enabled parameters are not in a reindex-requiring state and stay put.
    assert_eq!(
        env.params.status_of(PATIENT_NAME),
        Some(SearchParameterStatus::Enabled)
    );
}
