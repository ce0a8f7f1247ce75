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

//! Orchestrator and processing jobs driven through the job host.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use reindex::dal::memory::{InMemoryFhirStore, InMemoryQueue, InjectedFailure};
use reindex::dal::{QueueClient, ReindexQuery, ReindexRange, ReindexSearchResult, SearchService};
use reindex::error::StoreError;
use reindex::distributed::{
    enqueue_orchestrator, JobHost, ReindexOrchestratorJobDefinition, ReindexOrchestratorJobResult,
    ReindexProcessingJobDefinition, ReindexProcessingJobResult, PROCESSING_TYPE_ID,
};
use reindex::models::{JobInfo, QueueJobStatus, QueueType};
use reindex::{ReindexContext, SearchParameterStatus};

use crate::fixtures::{fast_config, wait_until, TestEnv, OBSERVATION_CODE, PATIENT_BIRTHDATE};

struct RunningHost {
    host: Arc<JobHost>,
    handle: JoinHandle<()>,
}

impl RunningHost {
    fn start(ctx: ReindexContext, queue: Arc<InMemoryQueue>, max_concurrent_jobs: usize) -> Self {
        let host = Arc::new(
            JobHost::new(ctx, queue)
                .with_max_concurrent_jobs(max_concurrent_jobs)
                .with_poll_interval(Duration::from_millis(10))
                .with_heartbeat_interval(Duration::from_millis(20)),
        );
        let handle = {
            let host = host.clone();
            tokio::spawn(async move { host.run().await })
        };
        Self { host, handle }
    }

    async fn stop(self) {
        self.host.shutdown_token().cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("host should stop")
            .expect("host panicked");
    }
}

async fn wait_for_status(queue: &Arc<InMemoryQueue>, job_id: i64, status: QueueJobStatus) -> JobInfo {
    let finished = wait_until(Duration::from_secs(10), || {
        let queue = queue.clone();
        async move {
            queue
                .get_job_by_id(QueueType::Reindex, job_id)
                .await
                .ok()
                .flatten()
                .map(|j| j.status == status)
                .unwrap_or(false)
        }
    })
    .await;
    let job = queue
        .get_job_by_id(QueueType::Reindex, job_id)
        .await
        .unwrap()
        .expect("job exists");
    assert!(finished, "job {job_id} ended as {} instead of {status}", job.status);
    job
}

fn orchestrator_result(job: &JobInfo) -> ReindexOrchestratorJobResult {
    serde_json::from_str(job.result.as_deref().expect("orchestrator result"))
        .expect("readable orchestrator result")
}

fn processing_jobs(queue: &InMemoryQueue) -> Vec<(JobInfo, ReindexProcessingJobDefinition)> {
    queue
        .jobs()
        .into_iter()
        .filter_map(|j| {
            let definition = serde_json::from_str::<ReindexProcessingJobDefinition>(&j.definition).ok()?;
            (definition.type_id == PROCESSING_TYPE_ID).then_some((j, definition))
        })
        .collect()
}

/// Answers whole-type counts but never returns from range queries, so
/// processing jobs stay running until they are canceled.
struct StalledRanges {
    inner: Arc<InMemoryFhirStore>,
}

#[async_trait]
impl SearchService for StalledRanges {
    fn supports_surrogate_ordering(&self) -> bool {
        self.inner.supports_surrogate_ordering()
    }

    async fn search_for_reindex(
        &self,
        query: &ReindexQuery,
    ) -> Result<ReindexSearchResult, StoreError> {
        if query.range.is_some() {
            std::future::pending::<()>().await;
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

/// A search service whose backend is down.
struct UnavailableSearch;

#[async_trait]
impl SearchService for UnavailableSearch {
    fn supports_surrogate_ordering(&self) -> bool {
        true
    }

    async fn search_for_reindex(
        &self,
        _query: &ReindexQuery,
    ) -> Result<ReindexSearchResult, StoreError> {
        Err(StoreError::Unavailable("search backend offline".to_string()))
    }

    async fn get_surrogate_id_ranges(
        &self,
        _resource_type: &str,
        _start_id: i64,
        _end_id: i64,
        _range_size: u64,
    ) -> Result<Vec<(i64, i64)>, StoreError> {
        Err(StoreError::Unavailable("search backend offline".to_string()))
    }
}

fn context_with_search(
    env: &TestEnv,
    config: reindex::ReindexConfig,
    search: Arc<dyn SearchService>,
) -> ReindexContext {
    ReindexContext::new(
        config,
        env.jobs.clone(),
        search,
        env.store.clone(),
        env.params.clone(),
        env.params.clone(),
    )
}

fn two_type_env(env: &TestEnv) {
    env.patients_needing_reindex(23);
    env.add_parameter(
        OBSERVATION_CODE,
        "code",
        &["Observation"],
        SearchParameterStatus::PendingDelete,
    );
    env.store.seed("Observation", 6);
}

#[tokio::test]
async fn test_orchestrator_fans_out_and_advances_parameters() {
    let env = TestEnv::new();
    two_type_env(&env);
    let queue = Arc::new(InMemoryQueue::new());
    let host = RunningHost::start(env.fast_context(), queue.clone(), 3);

    let orchestrator = enqueue_orchestrator(
        queue.as_ref(),
        &ReindexOrchestratorJobDefinition::new(vec![], 5),
    )
    .await
    .unwrap();
    let done = wait_for_status(&queue, orchestrator.id, QueueJobStatus::Completed).await;
    host.stop().await;

    let result = orchestrator_result(&done);
    // 23 patients in ranges of 5 plus 6 observations in ranges of 5.
    assert_eq!(result.created_jobs, 7);
    assert_eq!(result.succeeded_resources, 29);
    assert_eq!(result.failed_jobs, 0);
    assert_eq!(
        result.advanced_search_parameter_urls,
        vec![
            OBSERVATION_CODE.to_string(),
            PATIENT_BIRTHDATE.to_string()
        ]
    );

    let jobs = processing_jobs(&queue);
    assert_eq!(jobs.len(), 7);
    for (job, definition) in &jobs {
        assert_eq!(job.group_id, orchestrator.group_id);
        assert_eq!(job.status, QueueJobStatus::Completed);
        assert!(matches!(definition.range, ReindexRange::SurrogateId { .. }));
        let r: ReindexProcessingJobResult =
            serde_json::from_str(job.result.as_deref().unwrap()).unwrap();
        assert!(r.succeeded_resource_count <= 5);
    }

    assert_eq!(env.stale_resources("Patient"), 0);
    assert_eq!(env.stale_resources("Observation"), 0);
    assert_eq!(
        env.params.status_of(PATIENT_BIRTHDATE),
        Some(SearchParameterStatus::Enabled)
    );
    assert_eq!(
        env.params.status_of(OBSERVATION_CODE),
        Some(SearchParameterStatus::Deleted)
    );
    assert_eq!(env.params.history().len(), 2);
}

#[tokio::test]
async fn test_offset_partitions_without_surrogate_ordering() {
    let env = TestEnv::without_surrogate_ordering();
    env.patients_needing_reindex(23);
    let queue = Arc::new(InMemoryQueue::new());
    let host = RunningHost::start(env.fast_context(), queue.clone(), 3);

    let orchestrator = enqueue_orchestrator(
        queue.as_ref(),
        &ReindexOrchestratorJobDefinition::new(vec![], 5),
    )
    .await
    .unwrap();
    let done = wait_for_status(&queue, orchestrator.id, QueueJobStatus::Completed).await;
    host.stop().await;

    let jobs = processing_jobs(&queue);
    assert_eq!(jobs.len(), 5);
    assert!(jobs
        .iter()
        .all(|(_, d)| matches!(d.range, ReindexRange::Offset { take: 5, .. })));
    assert_eq!(orchestrator_result(&done).succeeded_resources, 23);
    assert_eq!(env.stale_resources("Patient"), 0);
}

#[tokio::test]
async fn test_failed_processing_job_is_a_soft_failure() {
    let env = TestEnv::new();
    two_type_env(&env);
    env.store
        .inject_failure(Some("Patient"), InjectedFailure::Timeout);
    let ctx = env.context(fast_config().processing_timeout_retries(0).build());
    let queue = Arc::new(InMemoryQueue::new());
    let host = RunningHost::start(ctx, queue.clone(), 3);

    let orchestrator = enqueue_orchestrator(
        queue.as_ref(),
        &ReindexOrchestratorJobDefinition::new(vec![], 5),
    )
    .await
    .unwrap();
    let done = wait_for_status(&queue, orchestrator.id, QueueJobStatus::Completed).await;
    host.stop().await;

    let result = orchestrator_result(&done);
    assert_eq!(result.failed_jobs, 1);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("Patient"));
    assert_eq!(
        result.advanced_search_parameter_urls,
        vec![OBSERVATION_CODE.to_string()]
    );
    assert_eq!(
        env.params.status_of(PATIENT_BIRTHDATE),
        Some(SearchParameterStatus::Supported)
    );
    assert_eq!(
        env.params.status_of(OBSERVATION_CODE),
        Some(SearchParameterStatus::Deleted)
    );
}

#[tokio::test]
async fn test_processing_timeout_is_rearmed() {
    let env = TestEnv::new();
    env.patients_needing_reindex(8);
    env.store
        .inject_failure(Some("Patient"), InjectedFailure::Timeout);
    let ctx = env.context(fast_config().processing_timeout_retries(2).build());
    let queue = Arc::new(InMemoryQueue::new());
    let host = RunningHost::start(ctx, queue.clone(), 2);

    let orchestrator = enqueue_orchestrator(
        queue.as_ref(),
        &ReindexOrchestratorJobDefinition::new(vec![], 10),
    )
    .await
    .unwrap();
    let done = wait_for_status(&queue, orchestrator.id, QueueJobStatus::Completed).await;
    host.stop().await;

    let jobs = processing_jobs(&queue);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].0.status, QueueJobStatus::Completed);
    assert_eq!(jobs[0].0.attempt, 1);
    assert_eq!(orchestrator_result(&done).failed_jobs, 0);
    assert_eq!(env.stale_resources("Patient"), 0);
}

#[tokio::test]
async fn test_customer_cancel_cancels_the_group() {
    let env = TestEnv::new();
    two_type_env(&env);
    let queue = Arc::new(InMemoryQueue::new());
    let stalled = Arc::new(StalledRanges {
        inner: env.store.clone(),
    });
    let ctx = context_with_search(&env, fast_config().build(), stalled);
    let host = RunningHost::start(ctx, queue.clone(), 1);

    let orchestrator = enqueue_orchestrator(
        queue.as_ref(),
        &ReindexOrchestratorJobDefinition::new(vec![], 5),
    )
    .await
    .unwrap();
    let q = queue.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let q = q.clone();
            async move { q.jobs().len() > 1 }
        })
        .await
    );

    queue.request_cancel(orchestrator.id);
    wait_for_status(&queue, orchestrator.id, QueueJobStatus::Cancelled).await;
    host.stop().await;

    for (job, _) in processing_jobs(&queue) {
        assert_eq!(job.status, QueueJobStatus::Cancelled);
    }
    assert_eq!(env.store.write_count(), 0);
    assert!(env.params.history().is_empty());
}

#[tokio::test]
async fn test_orchestrator_resumes_without_enqueueing_again() {
    let env = TestEnv::new();
    two_type_env(&env);
    let config = fast_config()
        .job_heartbeat_timeout(Duration::from_millis(200))
        .build();
    let ctx = env.context(config.clone());
    let queue = Arc::new(InMemoryQueue::new());

    // First host creates the processing jobs and then goes away before any
    // of them finishes.
    let stalled = Arc::new(StalledRanges {
        inner: env.store.clone(),
    });
    let first = RunningHost::start(
        context_with_search(&env, config, stalled),
        queue.clone(),
        1,
    );
    let orchestrator = enqueue_orchestrator(
        queue.as_ref(),
        &ReindexOrchestratorJobDefinition::new(vec![], 5),
    )
    .await
    .unwrap();
    let q = queue.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let q = q.clone();
            async move { q.jobs().len() > 1 }
        })
        .await
    );
    first.stop().await;
    let enqueued = queue.jobs().len();
    let abandoned = queue
        .get_job_by_id(QueueType::Reindex, orchestrator.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(abandoned.status, QueueJobStatus::Running);

    // Second host reclaims the orchestrator once its heartbeat expires.
    let second = RunningHost::start(ctx, queue.clone(), 3);
    let done = wait_for_status(&queue, orchestrator.id, QueueJobStatus::Completed).await;
    second.stop().await;

    assert_eq!(queue.jobs().len(), enqueued);
    let result = orchestrator_result(&done);
    assert_eq!(result.created_jobs, enqueued - 1);
    assert_eq!(env.stale_resources("Patient"), 0);
    assert_eq!(env.stale_resources("Observation"), 0);
    assert_eq!(
        env.params.status_of(PATIENT_BIRTHDATE),
        Some(SearchParameterStatus::Enabled)
    );
}

#[tokio::test]
async fn test_single_slot_host_completes_the_job() {
    let env = TestEnv::new();
    env.patients_needing_reindex(6);
    let queue = Arc::new(InMemoryQueue::new());
    let host = RunningHost::start(env.fast_context(), queue.clone(), 1);

    let orchestrator = enqueue_orchestrator(
        queue.as_ref(),
        &ReindexOrchestratorJobDefinition::new(vec![], 5),
    )
    .await
    .unwrap();
    let done = wait_for_status(&queue, orchestrator.id, QueueJobStatus::Completed).await;
    host.stop().await;

    let jobs = processing_jobs(&queue);
    assert_eq!(jobs.len(), 2);
    assert!(jobs
        .iter()
        .all(|(job, _)| job.status == QueueJobStatus::Completed));
    assert_eq!(orchestrator_result(&done).succeeded_resources, 6);
    assert_eq!(env.stale_resources("Patient"), 0);
    assert_eq!(
        env.params.status_of(PATIENT_BIRTHDATE),
        Some(SearchParameterStatus::Enabled)
    );
}

#[tokio::test]
async fn test_orchestrator_fails_after_repeated_transient_errors() {
    let env = TestEnv::new();
    env.patients_needing_reindex(6);
    let ctx = context_with_search(
        &env,
        fast_config().consecutive_failures_threshold(3).build(),
        Arc::new(UnavailableSearch),
    );
    let queue = Arc::new(InMemoryQueue::new());
    let host = RunningHost::start(ctx, queue.clone(), 2);

    let orchestrator = enqueue_orchestrator(
        queue.as_ref(),
        &ReindexOrchestratorJobDefinition::new(vec![], 5),
    )
    .await
    .unwrap();
    let failed = wait_for_status(&queue, orchestrator.id, QueueJobStatus::Failed).await;
    host.stop().await;

    assert_eq!(failed.attempt, 3);
    let message = failed.result.unwrap_or_default();
    assert!(message.contains("orchestration failed after 4 attempts"), "{message}");
    assert!(processing_jobs(&queue).is_empty());
    assert_eq!(env.stale_resources("Patient"), 6);
}

#[tokio::test]
async fn test_orchestrator_without_parameters_reports_message() {
    let env = TestEnv::new();
    env.store.seed("Patient", 3);
    let queue = Arc::new(InMemoryQueue::new());
    let host = RunningHost::start(env.fast_context(), queue.clone(), 2);

    let orchestrator = enqueue_orchestrator(
        queue.as_ref(),
        &ReindexOrchestratorJobDefinition::new(vec![], 5),
    )
    .await
    .unwrap();
    let done = wait_for_status(&queue, orchestrator.id, QueueJobStatus::Completed).await;
    host.stop().await;

    let result = orchestrator_result(&done);
    assert_eq!(result.created_jobs, 0);
    assert!(result.message.is_some());
    assert_eq!(queue.jobs().len(), 1);
}

#[tokio::test]
async fn test_unknown_job_type_fails() {
    let env = TestEnv::new();
    let queue = Arc::new(InMemoryQueue::new());
    let host = RunningHost::start(env.fast_context(), queue.clone(), 1);

    let created = queue
        .enqueue(QueueType::Reindex, vec!["{\"typeId\":9}".to_string()], None)
        .await
        .unwrap();
    let failed = wait_for_status(&queue, created[0].id, QueueJobStatus::Failed).await;
    host.stop().await;

    assert!(failed.result.unwrap_or_default().contains("unknown type"));
}
