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

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::InitializationSignal;
use crate::context::ReindexContext;
use crate::error::ReindexError;
use crate::task::ReindexJobTask;

/// Long-lived loop that claims reindex jobs and runs them.
///
/// One worker runs per server process. It waits for the
/// [`InitializationSignal`], then on every cycle:
///
/// 1. applies pending search parameter status changes
/// 2. reaps finished job tasks
/// 3. claims up to `max_running_jobs - running` queued or heartbeat-expired
///    jobs and spawns a fresh [`ReindexJobTask`] for each
///
/// and sleeps `polling_frequency` between cycles. Errors are logged and the
/// loop continues.
pub struct ReindexJobWorker {
    ctx: ReindexContext,
    initialized: InitializationSignal,
    shutdown: CancellationToken,
}

impl ReindexJobWorker {
    pub fn new(ctx: ReindexContext, initialized: InitializationSignal) -> Self {
        Self {
            ctx,
            initialized,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the worker and cancels its running jobs.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Runs until shutdown, then waits for running jobs to stop.
    pub async fn run(&self) {
        info!("Reindex job worker waiting for search parameter initialization");
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                info!("Reindex job worker stopped before initialization");
                return;
            }
            _ = self.initialized.wait() => {}
        }
        info!(
            max_running_jobs = self.ctx.config.max_running_jobs(),
            polling_frequency = ?self.ctx.config.polling_frequency(),
            "Starting reindex job worker"
        );

        let mut running: JoinSet<()> = JoinSet::new();
        loop {
            match self.run_cycle(&mut running).await {
                Ok(0) => {}
                Ok(claimed) => debug!(claimed, "Claimed reindex jobs"),
                Err(e) => error!("Reindex worker cycle failed: {}", e),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.ctx.config.polling_frequency()) => {}
            }
        }

        info!(running = running.len(), "Reindex job worker shutting down");
        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                error!("Reindex job task panicked: {}", e);
            }
        }
    }

    async fn run_cycle(&self, running: &mut JoinSet<()>) -> Result<usize, ReindexError> {
        match self
            .ctx
            .status_manager
            .get_and_apply_search_parameter_updates()
            .await
        {
            Ok(0) => {}
            Ok(applied) => info!(applied, "Applied search parameter status updates"),
            Err(e) => warn!("Failed to apply search parameter updates: {}", e),
        }

        while let Some(joined) = running.try_join_next() {
            if let Err(e) = joined {
                error!("Reindex job task panicked: {}", e);
            }
        }

        let available = self.ctx.config.max_running_jobs().saturating_sub(running.len());
        if available == 0 {
            debug!("All reindex job slots busy, skipping acquire");
            return Ok(0);
        }

        let jobs = self
            .ctx
            .job_store
            .acquire_jobs(available, self.ctx.config.job_heartbeat_timeout())
            .await?;
        let claimed = jobs.len();

        for job in jobs {
            let task = ReindexJobTask::new(self.ctx.clone());
            let cancel = self.shutdown.child_token();
            let job_id = job.record.id.clone();
            info!(job_id = %job_id, "Acquired reindex job");
            running.spawn(async move {
                match task.execute(job, cancel).await {
                    Ok(done) => info!(job_id = %job_id, status = %done.record.status, "Reindex job task ended"),
                    Err(ReindexError::Canceled) => info!(job_id = %job_id, "Reindex job task canceled"),
                    Err(e) => error!(job_id = %job_id, "Reindex job task failed: {}", e),
                }
            });
        }
        Ok(claimed)
    }
}
