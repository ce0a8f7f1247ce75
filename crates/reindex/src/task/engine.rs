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

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::finalize::{complete_and_advance, finalize};
use super::work_unit::WorkUnit;
use super::{JobState, SharedJobState};
use crate::context::ReindexContext;
use crate::discovery::{count_resources, select_parameters};
use crate::error::ReindexError;
use crate::models::{JobIssue, JobRecordWrapper, JobStatus, QueryKey};
use crate::throttle::ThrottleController;

/// Upper bound on an idle wait while units are stuck `Running` with no task.
const MAX_IDLE_WAIT: Duration = Duration::from_secs(1);

type UnitResult = (QueryKey, u64, Result<(), ReindexError>);

/// Executes exactly one job record.
///
/// A task is single-use: the first call to [`ReindexJobTask::execute`] binds
/// it, and any further call fails with [`ReindexError::Contract`].
pub struct ReindexJobTask {
    ctx: ReindexContext,
    bound: AtomicBool,
}

impl ReindexJobTask {
    pub fn new(ctx: ReindexContext) -> Self {
        Self {
            ctx,
            bound: AtomicBool::new(false),
        }
    }

    /// Runs `job` until it reaches a terminal status, is canceled, or loses
    /// ownership of the record.
    ///
    /// Returns the final record and version tag. External cancellation of the
    /// job and cancellation through `cancel` both return
    /// [`ReindexError::Canceled`] after in-flight work-units have drained.
    pub async fn execute(
        &self,
        job: JobRecordWrapper,
        cancel: CancellationToken,
    ) -> Result<JobRecordWrapper, ReindexError> {
        if self.bound.swap(true, Ordering::SeqCst) {
            return Err(ReindexError::Contract(format!(
                "reindex task is already bound; cannot run job {}",
                job.record.id
            )));
        }

        let job_id = job.record.id.clone();
        info!(job_id = %job_id, "Starting reindex job");

        let mut throttle = self.ctx.throttle();
        throttle.initialize(&job.record, self.ctx.usage_sampler.provisioned_capacity());
        let state: SharedJobState = Arc::new(Mutex::new(JobState {
            record: job.record,
            version: job.version,
            throttle,
            fatal_failure: None,
        }));

        let result = self.run(&state, &cancel).await;

        let s = state.lock().await;
        match result {
            Ok(()) => {
                info!(
                    job_id = %job_id,
                    status = %s.record.status,
                    progress = s.record.progress,
                    count = s.record.count,
                    "Reindex job finished"
                );
                metrics::counter!("reindex_jobs_finished_total", "status" => s.record.status.as_str())
                    .increment(1);
                Ok(JobRecordWrapper {
                    record: s.record.clone(),
                    version: s.version.clone(),
                })
            }
            Err(e) => {
                warn!(job_id = %job_id, "Reindex job stopped: {}", e);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        state: &SharedJobState,
        cancel: &CancellationToken,
    ) -> Result<(), ReindexError> {
        {
            let mut s = state.lock().await;
            s.record.mark_running(Utc::now());
            if s.record.query_list.is_empty() && !self.initialize_job(&mut s).await? {
                return Ok(());
            }
        }

        let mut units = UnitSet::default();
        let result = self.process_queries(state, cancel, &mut units).await;
        if result.is_err() {
            units.cancel_all();
        }
        units.drain().await;
        result?;

        let mut s = state.lock().await;
        finalize(&self.ctx, &mut s).await
    }

    /// Selects parameters, counts resources and seeds the ledger. Returns
    /// `false` when the job was finished without any work-units.
    async fn initialize_job(&self, s: &mut JobState) -> Result<bool, ReindexError> {
        let ctx = &self.ctx;
        let max_issues = ctx.config.max_issues();

        let selection = select_parameters(
            ctx.status_manager.as_ref(),
            ctx.definitions.as_ref(),
            &ctx.catalog,
            &s.record.target_resource_types,
        )
        .await?;

        if selection.is_empty() {
            info!(job_id = %s.record.id, "No search parameters require reindexing");
            s.record.push_issue(
                JobIssue::information(
                    "There are no search parameters to reindex for the requested resource types",
                ),
                max_issues,
            );
            s.record.mark_canceled(Utc::now());
            s.persist(ctx.job_store.as_ref()).await?;
            return Ok(false);
        }

        let counts = count_resources(
            ctx.search.as_ref(),
            ctx.definitions.as_ref(),
            &selection.resource_types,
        )
        .await?;
        let total = counts.total();
        let now = Utc::now();
        for (resource_type, _) in counts.non_empty_types() {
            s.record
                .query_list
                .add_queued(QueryKey::new(resource_type.clone(), None), now);
        }

        s.record.search_parameter_urls = selection.search_parameter_urls;
        s.record.resource_types = selection.resource_types;
        s.record.resource_counts = counts.counts;
        s.record.resource_type_search_parameter_hashes = counts.hashes;
        s.record.count = total;

        if total == 0 {
            info!(job_id = %s.record.id, "No resources require reindexing");
            s.record.push_issue(
                JobIssue::information("No resources were found that require reindexing"),
                max_issues,
            );
            complete_and_advance(ctx, s).await?;
            s.persist(ctx.job_store.as_ref()).await?;
            return Ok(false);
        }

        info!(
            job_id = %s.record.id,
            parameters = s.record.search_parameter_urls.len(),
            resource_types = s.record.query_list.len(),
            total,
            "Initialized reindex job"
        );
        s.persist(ctx.job_store.as_ref()).await?;
        Ok(true)
    }

    async fn process_queries(
        &self,
        state: &SharedJobState,
        cancel: &CancellationToken,
        units: &mut UnitSet,
    ) -> Result<(), ReindexError> {
        let heartbeat_timeout = self.ctx.config.job_heartbeat_timeout();
        let idle_wait = (heartbeat_timeout / 2).min(MAX_IDLE_WAIT);

        loop {
            if cancel.is_cancelled() {
                return Err(ReindexError::Canceled);
            }

            let (ceiling, delay, dispatched) = {
                let mut s = state.lock().await;
                if s.record.status == JobStatus::Canceled {
                    return Err(ReindexError::Canceled);
                }
                let ceiling = usize::from(s.record.max_concurrency.max(1));
                let dispatched = units.len() < ceiling
                    && units.dispatch_next(&self.ctx, state, &mut s, cancel);
                units.requeue_stale(&mut s, heartbeat_timeout);
                s.persist(self.ctx.job_store.as_ref()).await?;
                s.throttle.update_datastore_usage().await;
                let delay = Duration::from_millis(s.record.query_delay_interval_ms)
                    + s.throttle.get_throttle_based_delay();
                (ceiling, delay, dispatched)
            };

            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ReindexError::Canceled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if units.len() >= ceiling || (!dispatched && !units.is_empty()) {
                units.wait_for_any(cancel, heartbeat_timeout).await?;
            } else if !dispatched {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ReindexError::Canceled),
                    _ = tokio::time::sleep(idle_wait) => {}
                }
            }
            units.reap_finished()?;

            let latest = {
                let s = state.lock().await;
                let latest = self.ctx.job_store.get_job_by_id(&s.record.id).await?;
                if latest.record.status != JobStatus::Canceled && latest.version != s.version {
                    return Err(ReindexError::Conflict {
                        job_id: s.record.id.clone(),
                    });
                }
                if s.fatal_failure.is_some() {
                    return Ok(());
                }
                if !s.record.query_list.has_active() && units.is_empty() {
                    return Ok(());
                }
                latest
            };
            if latest.record.status == JobStatus::Canceled {
                info!(job_id = %latest.record.id, "Reindex job was canceled externally");
                state.lock().await.adopt(latest.record, latest.version);
                return Err(ReindexError::Canceled);
            }
        }
    }
}

/// In-flight work-units and their cancellation handles.
#[derive(Default)]
struct UnitSet {
    in_flight: JoinSet<UnitResult>,
    tokens: HashMap<QueryKey, (u64, CancellationToken)>,
    next_id: u64,
}

impl UnitSet {
    fn len(&self) -> usize {
        self.in_flight.len()
    }

    fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Marks the oldest queued unit `Running` and spawns it. Returns whether
    /// a unit was dispatched.
    fn dispatch_next(
        &mut self,
        ctx: &ReindexContext,
        state: &SharedJobState,
        s: &mut JobState,
        cancel: &CancellationToken,
    ) -> bool {
        let Some(key) = s.record.query_list.next_queued() else {
            return false;
        };
        if !s.record.query_list.mark_running(&key, Utc::now()) {
            return false;
        }

        self.next_id += 1;
        let id = self.next_id;
        let token = cancel.child_token();
        self.tokens.insert(key.clone(), (id, token.clone()));

        debug!(job_id = %s.record.id, unit = %key, "Dispatching work-unit");
        let unit = WorkUnit::new(ctx.clone(), state.clone(), key.clone(), token);
        self.in_flight.spawn(async move {
            let result = unit.run().await;
            (key, id, result)
        });
        true
    }

    /// Cancels and requeues units whose heartbeat expired.
    fn requeue_stale(&mut self, s: &mut JobState, timeout: Duration) {
        let now = Utc::now();
        for key in s.record.query_list.stale_running(now, timeout) {
            if let Some((_, token)) = self.tokens.remove(&key) {
                token.cancel();
            }
            if s.record.query_list.requeue(&key, now) {
                warn!(job_id = %s.record.id, unit = %key, "Requeued stale work-unit");
                metrics::counter!("reindex_stale_work_units_requeued_total").increment(1);
            }
        }
    }

    async fn wait_for_any(
        &mut self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<(), ReindexError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ReindexError::Canceled),
            joined = tokio::time::timeout(timeout, self.in_flight.join_next()) => {
                match joined {
                    Ok(Some(result)) => self.handle(result),
                    _ => Ok(()),
                }
            }
        }
    }

    fn reap_finished(&mut self) -> Result<(), ReindexError> {
        while let Some(result) = self.in_flight.try_join_next() {
            self.handle(result)?;
        }
        Ok(())
    }

    fn cancel_all(&mut self) {
        for (_, (_, token)) in self.tokens.drain() {
            token.cancel();
        }
    }

    async fn drain(&mut self) {
        while let Some(result) = self.in_flight.join_next().await {
            if let Err(e) = self.handle(result) {
                debug!("Work-unit ended while draining: {}", e);
            }
        }
    }

    fn handle(&mut self, joined: Result<UnitResult, JoinError>) -> Result<(), ReindexError> {
        let (key, id, result) = match joined {
            Ok(r) => r,
            Err(e) => {
                error!("Work-unit task panicked: {}", e);
                return Ok(());
            }
        };
        if matches!(self.tokens.get(&key), Some((current, _)) if *current == id) {
            self.tokens.remove(&key);
        }
        match result {
            Ok(()) | Err(ReindexError::Canceled) => Ok(()),
            Err(e @ ReindexError::Conflict { .. }) => Err(e),
            Err(e) => {
                warn!(unit = %key, "Work-unit returned an error: {}", e);
                Ok(())
            }
        }
    }
}
