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

//! Search parameter status transitions after proven reindexing.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::info;

use crate::dal::{SearchParameterDefinitionManager, SearchParameterStatusManager};
use crate::discovery::parameter_closure;
use crate::error::StoreError;
use crate::models::SearchParameterStatus;
use crate::resource_types::ResourceTypeCatalog;

/// Advances each of `urls` whose full resource-type closure is contained in
/// `reindexed_types`.
///
/// Only parameters still in a state that requires reindex are written, so a
/// parameter advanced by an earlier run is never advanced again. Returns the
/// urls that were advanced.
pub async fn advance_parameters(
    status_manager: &dyn SearchParameterStatusManager,
    definitions: &dyn SearchParameterDefinitionManager,
    catalog: &ResourceTypeCatalog,
    urls: &BTreeSet<String>,
    reindexed_types: &BTreeSet<String>,
) -> Result<Vec<String>, StoreError> {
    let current: HashMap<String, SearchParameterStatus> = status_manager
        .get_all_statuses()
        .await?
        .into_iter()
        .map(|s| (s.url, s.status))
        .collect();

    let mut by_target: BTreeMap<String, (SearchParameterStatus, Vec<String>)> = BTreeMap::new();
    for url in urls {
        let Some(status) = current.get(url) else {
            continue;
        };
        if !status.requires_reindex() {
            continue;
        }
        let Some(next) = status.after_reindex() else {
            continue;
        };
        let closure = parameter_closure(definitions, catalog, url);
        if closure.is_empty() || !closure.is_subset(reindexed_types) {
            continue;
        }
        by_target
            .entry(next.to_string())
            .or_insert_with(|| (next, Vec::new()))
            .1
            .push(url.clone());
    }

    let mut advanced = Vec::new();
    for (_, (status, group)) in by_target {
        status_manager.update_statuses(&group, status).await?;
        info!(count = group.len(), %status, "Advanced search parameter statuses");
        advanced.extend(group);
    }
    advanced.sort();
    Ok(advanced)
}
