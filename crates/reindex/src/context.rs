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

//! Collaborators shared by every reindex component.

use std::sync::Arc;

use crate::config::ReindexConfig;
use crate::dal::memory::StaticUsageSampler;
use crate::dal::{
    DataStoreUsageSampler, JobStore, ResourceStore, SearchParameterDefinitionManager,
    SearchParameterStatusManager, SearchService,
};
use crate::indexing::{JsonSearchIndexer, ResourceReindexer, SearchIndexer};
use crate::resource_types::ResourceTypeCatalog;
use crate::throttle::DefaultThrottleController;

/// Handles to the external collaborators plus engine configuration.
///
/// Cheap to clone; every collaborator is reference counted.
#[derive(Clone)]
pub struct ReindexContext {
    pub config: ReindexConfig,
    pub job_store: Arc<dyn JobStore>,
    pub search: Arc<dyn SearchService>,
    pub resource_store: Arc<dyn ResourceStore>,
    pub definitions: Arc<dyn SearchParameterDefinitionManager>,
    pub status_manager: Arc<dyn SearchParameterStatusManager>,
    pub usage_sampler: Arc<dyn DataStoreUsageSampler>,
    pub indexer: Arc<dyn SearchIndexer>,
    pub catalog: ResourceTypeCatalog,
}

impl ReindexContext {
    /// Creates a context with no usage sampler readings, the JSON indexer and
    /// the R4 type catalog.
    pub fn new(
        config: ReindexConfig,
        job_store: Arc<dyn JobStore>,
        search: Arc<dyn SearchService>,
        resource_store: Arc<dyn ResourceStore>,
        definitions: Arc<dyn SearchParameterDefinitionManager>,
        status_manager: Arc<dyn SearchParameterStatusManager>,
    ) -> Self {
        Self {
            config,
            job_store,
            search,
            resource_store,
            definitions,
            status_manager,
            usage_sampler: Arc::new(StaticUsageSampler::default()),
            indexer: Arc::new(JsonSearchIndexer),
            catalog: ResourceTypeCatalog::r4(),
        }
    }

    pub fn with_usage_sampler(mut self, sampler: Arc<dyn DataStoreUsageSampler>) -> Self {
        self.usage_sampler = sampler;
        self
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn SearchIndexer>) -> Self {
        self.indexer = indexer;
        self
    }

    pub fn with_catalog(mut self, catalog: ResourceTypeCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn reindexer(&self) -> ResourceReindexer {
        ResourceReindexer::new(
            self.definitions.clone(),
            self.indexer.clone(),
            self.resource_store.clone(),
            self.config.max_resources_per_write(),
        )
    }

    pub fn throttle(&self) -> DefaultThrottleController {
        DefaultThrottleController::new(
            self.usage_sampler.clone(),
            self.config.throttle_sample_window(),
        )
    }
}
