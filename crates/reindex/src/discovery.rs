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

//! Work discovery shared by the task engine and the distributed orchestrator.
//!
//! The pipeline is: parameters whose status requires reindexing, minus those
//! that apply to none of the target resource types, then the closure of
//! resource types they apply to, then a count-only query per type against the
//! type's current search-parameter hash.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::dal::{
    ReindexQuery, SearchParameterDefinitionManager, SearchParameterStatusManager, SearchService,
};
use crate::error::StoreError;
use crate::models::ResourceTypeCount;
use crate::resource_types::ResourceTypeCatalog;

/// Parameters needing reindex and the resource types they touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSelection {
    pub search_parameter_urls: BTreeSet<String>,
    pub resource_types: BTreeSet<String>,
}

impl ParameterSelection {
    pub fn is_empty(&self) -> bool {
        self.search_parameter_urls.is_empty()
    }
}

/// Per-type counts and hashes for a selection.
#[derive(Debug, Clone, Default)]
pub struct ResourceCounts {
    pub counts: BTreeMap<String, ResourceTypeCount>,
    pub hashes: BTreeMap<String, String>,
}

impl ResourceCounts {
    pub fn total(&self) -> u64 {
        self.counts.values().map(|c| c.count).sum()
    }

    /// Types with at least one resource to reindex.
    pub fn non_empty_types(&self) -> impl Iterator<Item = (&String, &ResourceTypeCount)> {
        self.counts.iter().filter(|(_, c)| c.count > 0)
    }
}

/// Concrete resource types a parameter applies to.
pub fn parameter_closure(
    definitions: &dyn SearchParameterDefinitionManager,
    catalog: &ResourceTypeCatalog,
    url: &str,
) -> BTreeSet<String> {
    match definitions.get_search_parameter(url) {
        Some(p) => catalog.closure(p.base_resource_types.iter().map(String::as_str)),
        None => BTreeSet::new(),
    }
}

/// Selects the parameters needing reindex, restricted to `target_types` when
/// that list is non-empty.
pub async fn select_parameters(
    status_manager: &dyn SearchParameterStatusManager,
    definitions: &dyn SearchParameterDefinitionManager,
    catalog: &ResourceTypeCatalog,
    target_types: &[String],
) -> Result<ParameterSelection, StoreError> {
    let targets: BTreeSet<&str> = target_types.iter().map(String::as_str).collect();
    let mut selection = ParameterSelection::default();

    for status in status_manager.get_all_statuses().await? {
        if !status.status.requires_reindex() {
            continue;
        }
        if definitions.get_search_parameter(&status.url).is_none() {
            warn!(url = %status.url, "Status entry without a definition, skipping");
            continue;
        }
        let closure = parameter_closure(definitions, catalog, &status.url);
        let applicable: BTreeSet<String> = if targets.is_empty() {
            closure
        } else {
            closure
                .into_iter()
                .filter(|t| targets.contains(t.as_str()))
                .collect()
        };
        if applicable.is_empty() {
            debug!(url = %status.url, "Parameter filtered out by target resource types");
            continue;
        }
        selection.search_parameter_urls.insert(status.url);
        selection.resource_types.extend(applicable);
    }
    Ok(selection)
}

/// Runs one count-only query per resource type.
pub async fn count_resources<'a, I>(
    search: &dyn SearchService,
    definitions: &dyn SearchParameterDefinitionManager,
    resource_types: I,
) -> Result<ResourceCounts, StoreError>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut result = ResourceCounts::default();
    for resource_type in resource_types {
        let hash = definitions.search_parameter_hash(resource_type);
        let found = search
            .search_for_reindex(&ReindexQuery::count(resource_type.as_str(), hash.as_str()))
            .await?;
        let count = ResourceTypeCount {
            count: found.total_count.unwrap_or(0),
            start_surrogate_id: found.surrogate_range.map(|(start, _)| start),
            end_surrogate_id: found.surrogate_range.map(|(_, end)| end),
        };
        debug!(resource_type = %resource_type, count = count.count, "Counted resources to reindex");
        result.counts.insert(resource_type.clone(), count);
        result.hashes.insert(resource_type.clone(), hash);
    }
    Ok(result)
}
