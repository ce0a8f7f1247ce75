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

//! The `run` command: seed the in-memory collaborators from the
//! configuration, submit one reindex job and wait for it to settle.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use reindex::dal::memory::{
    InMemoryFhirStore, InMemoryJobStore, InMemoryQueue, InMemorySearchParameters,
    StaticUsageSampler,
};
use reindex::dal::{QueueClient, SearchParameterDefinitionManager};
use reindex::distributed::{
    enqueue_orchestrator, JobHost, ReindexOrchestratorJobDefinition, ReindexOrchestratorJobResult,
};
use reindex::handlers::{CancelReindexHandler, CreateReindexHandler, GetReindexHandler};
use reindex::models::{QueueType, SearchParameterInfo};
use reindex::{
    InitializationSignal, ReindexContext, ReindexError, ReindexJobWorker, ResourceTypeCatalog,
    SearchParameterStatus,
};

use crate::config::CtlConfig;
use crate::Mode;

const WAIT_INTERVAL: Duration = Duration::from_millis(100);

pub struct RunOptions {
    pub mode: Mode,
    pub timeout: Duration,
    pub hosts: usize,
    /// Overrides the configured per-host slot count.
    pub jobs_per_host: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Finished,
    TimedOut,
    Interrupted,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub mode: Mode,
    pub outcome: Outcome,
    pub job: serde_json::Value,
    pub search_parameters: BTreeMap<String, Option<SearchParameterStatus>>,
    pub stale_resources: BTreeMap<String, usize>,
}

struct Seeded {
    ctx: ReindexContext,
    store: Arc<InMemoryFhirStore>,
    params: Arc<InMemorySearchParameters>,
}

impl Seeded {
    fn new(config: &CtlConfig) -> Self {
        let store = Arc::new(InMemoryFhirStore::new());
        let params = Arc::new(InMemorySearchParameters::new(ResourceTypeCatalog::r4()));
        let usage = Arc::new(StaticUsageSampler::new(config.usage.provisioned_capacity));
        usage.set_usage(config.usage.usage);

        for parameter in &config.search_parameters {
            let base: Vec<&str> = parameter.base.iter().map(String::as_str).collect();
            params.add(
                SearchParameterInfo::new(&parameter.url, &parameter.code, &base),
                parameter.status,
            );
        }
        for resource in &config.resources {
            store.seed(&resource.resource_type, resource.count);
            info!(
                "Seeded {} {} resources",
                resource.count, resource.resource_type
            );
        }

        let ctx = ReindexContext::new(
            config.reindex_config(),
            Arc::new(InMemoryJobStore::new()),
            store.clone(),
            store.clone(),
            params.clone(),
            params.clone(),
        )
        .with_usage_sampler(usage);

        Self { ctx, store, params }
    }

    fn report(
        &self,
        config: &CtlConfig,
        mode: Mode,
        outcome: Outcome,
        job: serde_json::Value,
    ) -> RunReport {
        let search_parameters = config
            .search_parameters
            .iter()
            .map(|p| (p.url.clone(), self.params.status_of(&p.url)))
            .collect();
        let stale_resources = config
            .resources
            .iter()
            .map(|r| {
                let hash = self.params.search_parameter_hash(&r.resource_type);
                let stale = self
                    .store
                    .resources_of(&r.resource_type)
                    .iter()
                    .filter(|w| w.search_parameter_hash.as_deref() != Some(hash.as_str()))
                    .count();
                (r.resource_type.clone(), stale)
            })
            .collect();
        RunReport {
            mode,
            outcome,
            job,
            search_parameters,
            stale_resources,
        }
    }
}

pub async fn run(config: &CtlConfig, options: RunOptions) -> Result<RunReport> {
    let seeded = Seeded::new(config);
    let (outcome, job) = match options.mode {
        Mode::Scheduler => run_scheduler(&seeded, config, &options).await?,
        Mode::Distributed => run_distributed(&seeded, config, &options).await?,
    };
    Ok(seeded.report(config, options.mode, outcome, job))
}

async fn run_scheduler(
    seeded: &Seeded,
    config: &CtlConfig,
    options: &RunOptions,
) -> Result<(Outcome, serde_json::Value)> {
    let ctx = seeded.ctx.clone();
    let created = CreateReindexHandler::new(ctx.clone())
        .handle(config.job_parameters())
        .await
        .context("Failed to create reindex job")?;
    let job_id = created.record.id.clone();
    info!("Created reindex job {}", job_id);

    let signal = InitializationSignal::default();
    let worker = Arc::new(ReindexJobWorker::new(ctx.clone(), signal.clone()));
    let handle: JoinHandle<()> = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };
    signal.set();

    let getter = GetReindexHandler::new(ctx.clone());
    let outcome = {
        let (getter, job_id) = (&getter, job_id.as_str());
        wait_for(options.timeout, || async move {
            Ok::<_, anyhow::Error>(getter.handle(job_id).await?.record.status.is_terminal())
        })
        .await?
    };

    if outcome != Outcome::Finished {
        match CancelReindexHandler::new(ctx).handle(&job_id).await {
            Ok(_) => warn!("Canceled reindex job {} ({:?})", job_id, outcome),
            Err(ReindexError::Validation(_)) => {}
            Err(e) => return Err(e).context("Failed to cancel reindex job"),
        }
    }

    worker.shutdown();
    handle.await.context("Reindex worker panicked")?;

    let record = getter.handle(&job_id).await?.record;
    info!("Reindex job {} ended as {}", job_id, record.status.as_str());
    Ok((outcome, serde_json::to_value(&record)?))
}

async fn run_distributed(
    seeded: &Seeded,
    config: &CtlConfig,
    options: &RunOptions,
) -> Result<(Outcome, serde_json::Value)> {
    let queue = Arc::new(InMemoryQueue::new());
    let parameters = config.job_parameters();
    let per_query = parameters
        .maximum_number_of_resources_per_query
        .unwrap_or_else(|| seeded.ctx.config.max_resources_per_query());
    let definition =
        ReindexOrchestratorJobDefinition::new(parameters.target_resource_types, per_query);
    let orchestrator = enqueue_orchestrator(queue.as_ref(), &definition).await?;
    info!("Enqueued orchestrator job {}", orchestrator.id);

    let hosts: Vec<(Arc<JobHost>, JoinHandle<()>)> = (0..options.hosts)
        .map(|_| {
            let host = JobHost::new(seeded.ctx.clone(), queue.clone());
            let host = Arc::new(match options.jobs_per_host {
                Some(slots) => host.with_max_concurrent_jobs(slots),
                None => host,
            });
            let handle = {
                let host = host.clone();
                tokio::spawn(async move { host.run().await })
            };
            (host, handle)
        })
        .collect();

    let orchestrator_id = orchestrator.id;
    let settled = || {
        let queue = queue.clone();
        async move {
            Ok::<_, anyhow::Error>(
                queue
                    .get_job_by_id(QueueType::Reindex, orchestrator_id)
                    .await?
                    .map(|j| !j.status.is_active())
                    .unwrap_or(true),
            )
        }
    };
    let outcome = wait_for(options.timeout, settled).await?;

    if outcome != Outcome::Finished {
        warn!(
            "Requesting cancellation of orchestrator job {} ({:?})",
            orchestrator_id, outcome
        );
        queue.request_cancel(orchestrator_id);
        wait_for(options.timeout, settled).await?;
    }

    for (host, _) in &hosts {
        host.shutdown_token().cancel();
    }
    for (_, handle) in hosts {
        handle.await.context("Job host panicked")?;
    }

    let job = queue
        .get_job_by_id(QueueType::Reindex, orchestrator.id)
        .await?
        .context("Orchestrator job disappeared from the queue")?;
    let result = job
        .result
        .as_deref()
        .map(|raw| serde_json::from_str::<ReindexOrchestratorJobResult>(raw))
        .transpose()
        .context("Unreadable orchestrator result")?;

    let mut processing: BTreeMap<String, usize> = BTreeMap::new();
    for queued in queue.jobs().iter().filter(|j| j.id != orchestrator.id) {
        *processing.entry(queued.status.to_string()).or_default() += 1;
    }
    info!("Orchestrator job {} ended as {}", job.id, job.status);

    Ok((
        outcome,
        serde_json::json!({
            "orchestrator": job,
            "result": result,
            "processing_jobs": processing,
        }),
    ))
}

/// Polls `done` until it reports true, the timeout passes or Ctrl-C arrives.
async fn wait_for<F, Fut>(timeout: Duration, mut done: F) -> Result<Outcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if done().await? {
            return Ok(Outcome::Finished);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(Outcome::TimedOut);
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(Outcome::Interrupted),
            _ = tokio::time::sleep(WAIT_INTERVAL) => {}
        }
    }
}
