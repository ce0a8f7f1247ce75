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

//! # Job Host
//!
//! Generic queue worker: dequeues reindex jobs, dispatches each by its
//! definition's `typeId`, heartbeats while it runs and records the outcome.
//!
//! | Outcome                           | Queue completion       |
//! |-----------------------------------|------------------------|
//! | `Ok(result)`                      | `Succeeded(result)`    |
//! | `Retriable`                       | `Rearm`                |
//! | `Failed` / `Contract`             | `Failed(message)`      |
//! | `Canceled` by cancel request      | `Cancelled`            |
//! | `Canceled` by host shutdown       | left running; another host reclaims it after the heartbeat expires |
//!
//! Processing jobs are bounded by `max_concurrent_jobs` slots. Orchestrators
//! only watch their group and do not take a slot.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::definitions::{peek_type_id, ORCHESTRATOR_TYPE_ID, PROCESSING_TYPE_ID};
use super::orchestrator::ReindexOrchestratorJob;
use super::processing::ReindexProcessingJob;
use crate::context::ReindexContext;
use crate::dal::{JobCompletion, QueueClient};
use crate::error::JobExecutionError;
use crate::models::{JobInfo, QueueType};

pub struct JobHost {
    ctx: ReindexContext,
    queue: Arc<dyn QueueClient>,
    max_concurrent_jobs: usize,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    shutdown: CancellationToken,
}

impl JobHost {
    pub fn new(ctx: ReindexContext, queue: Arc<dyn QueueClient>) -> Self {
        let heartbeat_interval =
            (ctx.config.job_heartbeat_timeout() / 3).max(Duration::from_millis(10));
        Self {
            max_concurrent_jobs: ctx.config.host_max_concurrent_jobs(),
            poll_interval: ctx.config.host_poll_interval(),
            ctx,
            queue,
            heartbeat_interval,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_max_concurrent_jobs(mut self, value: usize) -> Self {
        self.max_concurrent_jobs = value.max(1);
        self
    }

    pub fn with_poll_interval(mut self, value: Duration) -> Self {
        self.poll_interval = value;
        self
    }

    pub fn with_heartbeat_interval(mut self, value: Duration) -> Self {
        self.heartbeat_interval = value;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs until shutdown, then waits for running jobs.
    pub async fn run(&self) {
        info!(
            max_concurrent_jobs = self.max_concurrent_jobs,
            "Starting reindex job host"
        );
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_jobs));
        let mut running: JoinSet<()> = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            while let Some(joined) = running.try_join_next() {
                if let Err(e) = joined {
                    error!("Queue job task panicked: {}", e);
                }
            }

            match self
                .queue
                .dequeue(QueueType::Reindex, self.ctx.config.job_heartbeat_timeout())
                .await
            {
                Ok(Some(job)) => {
                    // Orchestrators run outside the slot pool, so the
                    // processing jobs they watch can always be dequeued.
                    let permit = (peek_type_id(&job.definition) != Some(ORCHESTRATOR_TYPE_ID))
                        .then_some(permit);
                    let runner = JobRunner {
                        ctx: self.ctx.clone(),
                        queue: self.queue.clone(),
                        heartbeat_interval: self.heartbeat_interval,
                        shutdown: self.shutdown.clone(),
                    };
                    running.spawn(async move {
                        let _permit = permit;
                        runner.run(job).await;
                    });
                }
                Ok(None) => {
                    drop(permit);
                    debug!("No queued reindex jobs");
                    self.idle().await;
                }
                Err(e) => {
                    drop(permit);
                    error!("Failed to dequeue reindex job: {}", e);
                    self.idle().await;
                }
            }
        }

        info!(running = running.len(), "Reindex job host shutting down");
        while running.join_next().await.is_some() {}
    }

    async fn idle(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.poll_interval) => {}
        }
    }
}

/// Runs one dequeued job with a heartbeat alongside.
struct JobRunner {
    ctx: ReindexContext,
    queue: Arc<dyn QueueClient>,
    heartbeat_interval: Duration,
    shutdown: CancellationToken,
}

impl JobRunner {
    async fn run(self, job: JobInfo) {
        let cancel = self.shutdown.child_token();
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.queue.clone(),
            job.clone(),
            self.heartbeat_interval,
            cancel.clone(),
        ));

        let outcome = self.dispatch(&job, cancel.clone()).await;
        heartbeat.abort();

        let completion = match outcome {
            Ok(result) => JobCompletion::Succeeded(result),
            Err(JobExecutionError::Retriable(msg)) => {
                info!(job_id = job.id, attempt = job.attempt, "Re-arming job: {}", msg);
                JobCompletion::Rearm
            }
            Err(JobExecutionError::Canceled) if self.shutdown.is_cancelled() => {
                info!(job_id = job.id, "Host shutting down, leaving job for another host");
                return;
            }
            Err(JobExecutionError::Canceled) => JobCompletion::Cancelled,
            Err(e @ (JobExecutionError::Failed(_) | JobExecutionError::Contract(_))) => {
                warn!(job_id = job.id, "Job failed: {}", e);
                JobCompletion::Failed(e.to_string())
            }
        };

        if let Err(e) = self.queue.complete_job(&job, completion).await {
            error!(job_id = job.id, "Failed to record job completion: {}", e);
        }
    }

    async fn dispatch(
        &self,
        job: &JobInfo,
        cancel: CancellationToken,
    ) -> Result<String, JobExecutionError> {
        match peek_type_id(&job.definition) {
            Some(ORCHESTRATOR_TYPE_ID) => {
                ReindexOrchestratorJob::new(self.ctx.clone(), self.queue.clone())
                    .execute(job, cancel)
                    .await
            }
            Some(PROCESSING_TYPE_ID) => {
                ReindexProcessingJob::new(self.ctx.clone())
                    .execute(job, cancel)
                    .await
            }
            other => Err(JobExecutionError::Contract(format!(
                "job {} has unknown type {:?}",
                job.id, other
            ))),
        }
    }
}

/// Refreshes the job heartbeat and cancels `cancel` when a cancel request is
/// observed.
async fn heartbeat_loop(
    queue: Arc<dyn QueueClient>,
    job: JobInfo,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        match queue.put_heartbeat(&job).await {
            Ok(true) => {
                info!(job_id = job.id, "Cancel requested for job");
                cancel.cancel();
                return;
            }
            Ok(false) => {}
            Err(e) => warn!(job_id = job.id, "Heartbeat failed: {}", e),
        }
    }
}
