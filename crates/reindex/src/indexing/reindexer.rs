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

//! Recomputes and writes search indices for a page of resources.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::hash::index_hash;
use super::indexer::SearchIndexer;
use crate::dal::{ResourceStore, SearchParameterDefinitionManager};
use crate::error::StoreError;
use crate::models::ResourceWrapper;

/// Counts from one reindex pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReindexOutcome {
    /// Resources whose indices were rewritten.
    pub rewritten: usize,
    /// Resources already indexed with the current hash.
    pub skipped: usize,
}

impl ReindexOutcome {
    pub fn processed(&self) -> usize {
        self.rewritten + self.skipped
    }
}

/// Re-extracts search values and writes them back in bounded batches.
///
/// A resource is rewritten only when its stored search-parameter hash
/// differs from the current hash of its type. The write replaces indices and
/// hash and never creates a new resource version.
#[derive(Clone)]
pub struct ResourceReindexer {
    definitions: Arc<dyn SearchParameterDefinitionManager>,
    indexer: Arc<dyn SearchIndexer>,
    resource_store: Arc<dyn ResourceStore>,
    batch_size: usize,
}

impl ResourceReindexer {
    pub fn new(
        definitions: Arc<dyn SearchParameterDefinitionManager>,
        indexer: Arc<dyn SearchIndexer>,
        resource_store: Arc<dyn ResourceStore>,
        batch_size: usize,
    ) -> Self {
        Self {
            definitions,
            indexer,
            resource_store,
            batch_size: batch_size.max(1),
        }
    }

    /// Reindexes `resources` against the per-type hashes captured when the
    /// job started. Types missing from `hashes` use the current hash.
    pub async fn reindex(
        &self,
        resources: Vec<ResourceWrapper>,
        hashes: &BTreeMap<String, String>,
    ) -> Result<ReindexOutcome, StoreError> {
        let mut outcome = ReindexOutcome::default();
        let mut pending = Vec::with_capacity(self.batch_size);

        for mut resource in resources {
            let current_hash = hashes
                .get(&resource.resource_type)
                .cloned()
                .unwrap_or_else(|| self.definitions.search_parameter_hash(&resource.resource_type));

            if resource.search_parameter_hash.as_deref() == Some(current_hash.as_str()) {
                outcome.skipped += 1;
                continue;
            }

            let parameters = self.definitions.indexed_parameters_for(&resource.resource_type);
            let entries = self.indexer.extract(&resource, &parameters);
            if index_hash(&entries) != index_hash(&resource.search_indices) {
                resource.search_indices = entries;
            }
            resource.search_parameter_hash = Some(current_hash);
            pending.push(resource);

            if pending.len() >= self.batch_size {
                outcome.rewritten += self.flush(&mut pending).await?;
            }
        }
        outcome.rewritten += self.flush(&mut pending).await?;

        metrics::counter!("reindex_resources_rewritten_total").increment(outcome.rewritten as u64);
        Ok(outcome)
    }

    async fn flush(&self, pending: &mut Vec<ResourceWrapper>) -> Result<usize, StoreError> {
        if pending.is_empty() {
            return Ok(0);
        }
        let batch = std::mem::take(pending);
        let size = batch.len();
        let written = self.resource_store.bulk_update_search_indices(batch).await?;
        debug!(batch_size = size, written, "Wrote search index batch");
        Ok(written)
    }
}
