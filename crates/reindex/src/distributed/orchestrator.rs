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

//! The orchestrator computes partitions once, enqueues one processing job per
//! partition under its own group, then watches the group until every job has
//! ended. Search parameters are advanced as soon as every resource type they
//! apply to has all of its processing jobs completed.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::definitions::{
    peek_type_id, ReindexOrchestratorJobDefinition, ReindexOrchestratorJobResult,
    ReindexProcessingJobDefinition, ReindexProcessingJobResult, ORCHESTRATOR_TYPE_ID,
    PROCESSING_TYPE_ID,
};
use super::partition::partition_resource_type;
use super::polling::AdaptivePoller;
use crate::context::ReindexContext;
use crate::dal::QueueClient;
use crate::discovery::{count_resources, select_parameters};
use crate::error::{JobExecutionError, ReindexError, StoreError};
use crate::models::{JobInfo, QueueJobStatus, QueueType};
use crate::status::advance_parameters;

/// Submits an orchestrator job in a new group and returns it.
pub async fn enqueue_orchestrator(
    queue: &dyn QueueClient,
    definition: &ReindexOrchestratorJobDefinition,
) -> Result<JobInfo, ReindexError> {
    let payload = serde_json::to_string(definition)?;
    let mut created = queue.enqueue(QueueType::Reindex, vec![payload], None).await?;
    created
        .pop()
        .ok_or_else(|| ReindexError::Contract("queue accepted no orchestrator job".to_string()))
}

pub struct ReindexOrchestratorJob {
    ctx: ReindexContext,
    queue: Arc<dyn QueueClient>,
}

/// A processing job of the group with its parsed definition.
struct TrackedJob {
    info: JobInfo,
    definition: ReindexProcessingJobDefinition,
}

impl ReindexOrchestratorJob {
    pub fn new(ctx: ReindexContext, queue: Arc<dyn QueueClient>) -> Self {
        Self { ctx, queue }
    }

    pub async fn execute(
        &self,
        job_info: &JobInfo,
        cancel: CancellationToken,
    ) -> Result<String, JobExecutionError> {
        let definition: ReindexOrchestratorJobDefinition =
            serde_json::from_str(&job_info.definition).map_err(|e| {
                JobExecutionError::Contract(format!(
                    "job {} has an unreadable orchestrator definition: {e}",
                    job_info.id
                ))
            })?;
        if definition.type_id != ORCHESTRATOR_TYPE_ID {
            return Err(JobExecutionError::Contract(format!(
                "job {} has type {} but was dispatched as an orchestrator",
                job_info.id, definition.type_id
            )));
        }

        match self.run(job_info, &definition, &cancel).await {
            Ok(result) => serde_json::to_string(&result)
                .map_err(|e| JobExecutionError::Failed(e.to_string())),
            Err(e) if e.is_retriable() => {
                let threshold = self.ctx.config.consecutive_failures_threshold();
                if job_info.attempt < threshold {
                    warn!(
                        job_id = job_info.id,
                        attempt = job_info.attempt,
                        "Orchestration failed, re-arming: {}",
                        e
                    );
                    Err(JobExecutionError::Retriable(e.to_string()))
                } else {
                    Err(JobExecutionError::Failed(format!(
                        "orchestration failed after {} attempts: {e}",
                        job_info.attempt + 1
                    )))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn run(
        &self,
        job_info: &JobInfo,
        definition: &ReindexOrchestratorJobDefinition,
        cancel: &CancellationToken,
    ) -> Result<ReindexOrchestratorJobResult, ReindexError> {
        let ctx = &self.ctx;
        let group_id = job_info.group_id;

        match ctx.status_manager.get_and_apply_search_parameter_updates().await {
            Ok(applied) => debug!(applied, "Synced search parameter statuses"),
            Err(e) => warn!("Failed to sync search parameter statuses: {}", e),
        }

        let selection = select_parameters(
            ctx.status_manager.as_ref(),
            ctx.definitions.as_ref(),
            &ctx.catalog,
            &definition.target_resource_types,
        )
        .await?;

        let mut result = ReindexOrchestratorJobResult::default();
        let existing = self.processing_jobs(group_id).await?;
        let mut watched_urls = selection.search_parameter_urls.clone();

        if existing.is_empty() {
            if selection.is_empty() {
                info!(group_id, "No search parameters require reindexing");
                result.message =
                    Some("There are no search parameters to reindex".to_string());
                return Ok(result);
            }

            let counts = count_resources(
                ctx.search.as_ref(),
                ctx.definitions.as_ref(),
                &selection.resource_types,
            )
            .await?;
            let urls: Vec<String> = selection.search_parameter_urls.iter().cloned().collect();

            let mut payloads = Vec::new();
            for (resource_type, count) in counts.non_empty_types() {
                let ranges = partition_resource_type(
                    ctx.search.as_ref(),
                    resource_type,
                    count,
                    definition.maximum_number_of_resources_per_query,
                )
                .await?;
                for range in ranges {
                    let processing = ReindexProcessingJobDefinition {
                        type_id: PROCESSING_TYPE_ID,
                        group_id,
                        resource_type: resource_type.clone(),
                        range,
                        search_parameter_hash: counts
                            .hashes
                            .get(resource_type)
                            .cloned()
                            .unwrap_or_else(|| ctx.definitions.search_parameter_hash(resource_type)),
                        search_parameter_urls: urls.clone(),
                        maximum_number_of_resources_per_query: definition
                            .maximum_number_of_resources_per_query,
                    };
                    payloads.push(serde_json::to_string(&processing)?);
                }
            }

            if payloads.is_empty() {
                let advanced = advance_parameters(
                    ctx.status_manager.as_ref(),
                    ctx.definitions.as_ref(),
                    &ctx.catalog,
                    &selection.search_parameter_urls,
                    &selection.resource_types,
                )
                .await?;
                info!(group_id, "No resources require reindexing");
                result.advanced_search_parameter_urls = advanced;
                result.message = Some("No resources were found that require reindexing".to_string());
                return Ok(result);
            }

            let created = self
                .queue
                .enqueue(QueueType::Reindex, payloads, Some(group_id))
                .await?;
            result.created_jobs = created.len();
            metrics::counter!("reindex_processing_jobs_enqueued_total")
                .increment(created.len() as u64);
            info!(group_id, created = created.len(), "Enqueued processing jobs");
        } else {
            // Only parameters this group was created for; a parameter added
            // since then has no processing jobs covering it.
            let enqueued: BTreeSet<&String> = existing
                .iter()
                .flat_map(|j| j.definition.search_parameter_urls.iter())
                .collect();
            watched_urls.retain(|url| enqueued.contains(url));
            result.created_jobs = existing.len();
            info!(
                group_id,
                existing = existing.len(),
                "Processing jobs already exist, resuming watch"
            );
        }

        self.watch(
            job_info,
            &watched_urls,
            &selection.resource_types,
            cancel,
            &mut result,
        )
        .await?;
        Ok(result)
    }

    /// Polls the group until no processing job is active.
    async fn watch(
        &self,
        job_info: &JobInfo,
        urls: &BTreeSet<String>,
        scope: &BTreeSet<String>,
        cancel: &CancellationToken,
        result: &mut ReindexOrchestratorJobResult,
    ) -> Result<(), ReindexError> {
        let config = &self.ctx.config;
        let group_id = job_info.group_id;
        let mut poller = AdaptivePoller::new(
            config.orchestrator_poll_floor(),
            config.orchestrator_poll_ceiling(),
            config.orchestrator_stable_cycles(),
        );
        let mut seen_terminal: HashSet<i64> = HashSet::new();
        let mut advanced: BTreeSet<String> = BTreeSet::new();
        let mut last_counts: Option<StatusCounts> = None;

        loop {
            self.check_canceled(job_info, cancel).await?;

            let jobs = self.processing_jobs(group_id).await?;
            let counts = StatusCounts::of(jobs.iter().map(|j| j.info.status));
            let mut changed = last_counts != Some(counts);
            last_counts = Some(counts);

            for job in jobs.iter().filter(|j| !j.info.status.is_active()) {
                if !seen_terminal.insert(job.info.id) {
                    continue;
                }
                changed = true;
                self.record_terminal(job, result);
            }

            if changed {
                let pending: BTreeSet<String> = urls.difference(&advanced).cloned().collect();
                if !pending.is_empty() {
                    let complete = completed_types(&jobs, scope);
                    let newly = advance_parameters(
                        self.ctx.status_manager.as_ref(),
                        self.ctx.definitions.as_ref(),
                        &self.ctx.catalog,
                        &pending,
                        &complete,
                    )
                    .await?;
                    advanced.extend(newly);
                }
            }

            let active = jobs.iter().filter(|j| j.info.status.is_active()).count();
            if active == 0 {
                break;
            }

            let delay = poller.next_delay(changed);
            debug!(group_id, active, ?delay, "Waiting for processing jobs");
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }

        result.advanced_search_parameter_urls = advanced.into_iter().collect();
        info!(
            group_id,
            succeeded = result.succeeded_resources,
            failed = result.failed_resources,
            failed_jobs = result.failed_jobs,
            advanced = result.advanced_search_parameter_urls.len(),
            "Reindex orchestration finished"
        );
        Ok(())
    }

    fn record_terminal(&self, job: &TrackedJob, result: &mut ReindexOrchestratorJobResult) {
        let parsed = job
            .info
            .result
            .as_deref()
            .and_then(|r| serde_json::from_str::<ReindexProcessingJobResult>(r).ok());
        if let Some(r) = &parsed {
            result.succeeded_resources += r.succeeded_resource_count;
            result.failed_resources += r.failed_resource_count;
        }
        match job.info.status {
            QueueJobStatus::Completed => {
                if parsed.is_none() {
                    warn!(job_id = job.info.id, "Completed processing job has no readable result");
                }
            }
            QueueJobStatus::Failed => {
                let detail = parsed
                    .and_then(|r| r.error)
                    .or_else(|| job.info.result.clone())
                    .unwrap_or_else(|| "unknown error".to_string());
                warn!(
                    job_id = job.info.id,
                    resource_type = %job.definition.resource_type,
                    "Processing job failed: {}",
                    detail
                );
                result.failed_jobs += 1;
                result.errors.push(format!(
                    "Processing job {} for {} failed: {}",
                    job.info.id, job.definition.resource_type, detail
                ));
            }
            _ => {}
        }
    }

    /// Stops on caller cancellation. A customer cancel request on this job
    /// also cancels every processing job of the group.
    async fn check_canceled(
        &self,
        job_info: &JobInfo,
        cancel: &CancellationToken,
    ) -> Result<(), ReindexError> {
        let current = self
            .queue
            .get_job_by_id(QueueType::Reindex, job_info.id)
            .await?;
        if current.map(|j| j.cancel_requested).unwrap_or(false) {
            info!(group_id = job_info.group_id, "Cancel requested, canceling processing jobs");
            self.queue
                .cancel_jobs_by_group_id(QueueType::Reindex, job_info.group_id)
                .await?;
            return Err(ReindexError::Canceled);
        }
        if cancel.is_cancelled() {
            return Err(ReindexError::Canceled);
        }
        Ok(())
    }

    /// Processing jobs of the group. Entries whose definition cannot be read
    /// are skipped.
    async fn processing_jobs(&self, group_id: i64) -> Result<Vec<TrackedJob>, StoreError> {
        let jobs = self
            .queue
            .get_jobs_by_group_id(QueueType::Reindex, group_id)
            .await?;
        Ok(jobs
            .into_iter()
            .filter(|j| peek_type_id(&j.definition) != Some(ORCHESTRATOR_TYPE_ID))
            .filter_map(|info| {
                match serde_json::from_str::<ReindexProcessingJobDefinition>(&info.definition) {
                    Ok(definition) => Some(TrackedJob { info, definition }),
                    Err(e) => {
                        warn!(job_id = info.id, "Skipping job with malformed definition: {}", e);
                        None
                    }
                }
            })
            .collect())
    }
}

/// Number of processing jobs in each queue status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct StatusCounts {
    created: usize,
    running: usize,
    completed: usize,
    failed: usize,
    cancelled: usize,
}

impl StatusCounts {
    fn of(statuses: impl Iterator<Item = QueueJobStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            match status {
                QueueJobStatus::Created => counts.created += 1,
                QueueJobStatus::Running => counts.running += 1,
                QueueJobStatus::Completed => counts.completed += 1,
                QueueJobStatus::Failed => counts.failed += 1,
                QueueJobStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }
}

/// Types in `scope` whose processing jobs all completed. A type with no jobs
/// had nothing to reindex and counts as complete.
fn completed_types(jobs: &[TrackedJob], scope: &BTreeSet<String>) -> BTreeSet<String> {
    let mut done: BTreeMap<&str, bool> = scope.iter().map(|t| (t.as_str(), true)).collect();
    for job in jobs {
        if let Some(all_done) = done.get_mut(job.definition.resource_type.as_str()) {
            *all_done &= job.info.status == QueueJobStatus::Completed;
        }
    }
    done.into_iter()
        .filter(|(_, all_done)| *all_done)
        .map(|(t, _)| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use QueueJobStatus::*;

    #[test]
    fn test_status_counts_see_jobs_starting() {
        let before = StatusCounts::of([Created, Created, Completed].into_iter());
        let after = StatusCounts::of([Running, Created, Completed].into_iter());
        assert_ne!(before, after);
        assert_eq!(after.running, 1);
        assert_eq!(after.created, 1);
    }

    #[test]
    fn test_status_counts_stable_when_nothing_moves() {
        let first = StatusCounts::of([Running, Failed].into_iter());
        let second = StatusCounts::of([Failed, Running].into_iter());
        assert_eq!(first, second);
    }
}
