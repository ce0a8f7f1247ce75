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

//! Shared fixture for the reindex integration tests.
//!
//! Every test builds its own [`TestEnv`] so no state leaks between tests. The
//! environment wires the in-memory collaborators into a [`ReindexContext`]
//! with timings short enough for tests to finish in well under a second.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reindex::dal::memory::{
    InMemoryFhirStore, InMemoryJobStore, InMemorySearchParameters, StaticUsageSampler,
};
use reindex::dal::{JobStore, SearchParameterDefinitionManager};
use reindex::handlers::CreateReindexHandler;
use reindex::models::{JobParameters, JobRecordWrapper, SearchParameterInfo};
use reindex::{ReindexConfig, ReindexConfigBuilder, ReindexContext, ResourceTypeCatalog};
use reindex::SearchParameterStatus;

pub const PATIENT_BIRTHDATE: &str = "http://example.org/SearchParameter/Patient-birthdate";
pub const OBSERVATION_CODE: &str = "http://example.org/SearchParameter/Observation-code";
pub const PATIENT_NAME: &str = "http://example.org/SearchParameter/Patient-name";

/// Config with every delay shortened for tests.
pub fn fast_config() -> ReindexConfigBuilder {
    ReindexConfig::builder()
        .polling_frequency(Duration::from_millis(10))
        .job_heartbeat_timeout(Duration::from_secs(2))
        .default_query_delay(Duration::ZERO)
        .max_resources_per_query(10)
        .max_resources_per_write(4)
        .conflict_retry_base_delay(Duration::from_millis(5))
        .orchestrator_poll_floor(Duration::from_millis(10))
        .orchestrator_poll_ceiling(Duration::from_millis(50))
        .orchestrator_stable_cycles(2)
}

pub struct TestEnv {
    pub jobs: Arc<InMemoryJobStore>,
    pub store: Arc<InMemoryFhirStore>,
    pub params: Arc<InMemorySearchParameters>,
    pub usage: Arc<StaticUsageSampler>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_store(InMemoryFhirStore::new())
    }

    /// An environment whose store cannot partition by surrogate id.
    pub fn without_surrogate_ordering() -> Self {
        Self::with_store(InMemoryFhirStore::without_surrogate_ordering())
    }

    fn with_store(store: InMemoryFhirStore) -> Self {
        Self {
            jobs: Arc::new(InMemoryJobStore::new()),
            store: Arc::new(store),
            params: Arc::new(InMemorySearchParameters::new(ResourceTypeCatalog::r4())),
            usage: Arc::new(StaticUsageSampler::default()),
        }
    }

    pub fn context(&self, config: ReindexConfig) -> ReindexContext {
        ReindexContext::new(
            config,
            self.jobs.clone(),
            self.store.clone(),
            self.store.clone(),
            self.params.clone(),
            self.params.clone(),
        )
        .with_usage_sampler(self.usage.clone())
    }

    pub fn fast_context(&self) -> ReindexContext {
        self.context(fast_config().build())
    }

    pub fn add_parameter(&self, url: &str, code: &str, base: &[&str], status: SearchParameterStatus) {
        self.params
            .add(SearchParameterInfo::new(url, code, base), status);
    }

    /// A `Supported` birthdate parameter on Patient and `count` patients.
    pub fn patients_needing_reindex(&self, count: usize) {
        self.add_parameter(
            PATIENT_BIRTHDATE,
            "birthDate",
            &["Patient"],
            SearchParameterStatus::Supported,
        );
        self.store.seed("Patient", count);
    }

    pub fn current_hash(&self, resource_type: &str) -> String {
        self.params.search_parameter_hash(resource_type)
    }

    /// Resources of a type whose stored hash differs from the current one.
    pub fn stale_resources(&self, resource_type: &str) -> usize {
        let hash = self.current_hash(resource_type);
        self.store
            .resources_of(resource_type)
            .iter()
            .filter(|r| r.search_parameter_hash.as_deref() != Some(hash.as_str()))
            .count()
    }

    pub async fn create_job(
        &self,
        ctx: &ReindexContext,
        parameters: JobParameters,
    ) -> JobRecordWrapper {
        CreateReindexHandler::new(ctx.clone())
            .handle(parameters)
            .await
            .expect("Failed to create reindex job")
    }

    pub async fn job(&self, job_id: &str) -> JobRecordWrapper {
        self.jobs
            .get_job_by_id(job_id)
            .await
            .expect("Failed to read job")
    }
}

/// Parameters with no target types and a page size of `per_query`.
pub fn job_parameters(per_query: u32) -> JobParameters {
    JobParameters {
        maximum_number_of_resources_per_query: Some(per_query),
        query_delay_interval_ms: Some(0),
        ..Default::default()
    }
}

/// Polls `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
