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

//! In-memory search parameter definitions and lifecycle statuses.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::debug;

use crate::dal::{SearchParameterDefinitionManager, SearchParameterStatusManager};
use crate::error::StoreError;
use crate::indexing::search_parameter_hash;
use crate::models::{ResourceSearchParameterStatus, SearchParameterInfo, SearchParameterStatus};
use crate::resource_types::ResourceTypeCatalog;

#[derive(Default)]
struct ParameterState {
    definitions: BTreeMap<String, SearchParameterInfo>,
    statuses: BTreeMap<String, ResourceSearchParameterStatus>,
    /// Changes made by "other instances", applied on the next sync.
    pending: Vec<(String, SearchParameterStatus)>,
    /// Every status write, in order.
    history: Vec<(String, SearchParameterStatus)>,
}

/// Implements both the definition manager and the status manager.
///
/// A parameter contributes to its types' indexed set (and therefore to their
/// hash) while it is `Supported` or `Enabled`.
pub struct InMemorySearchParameters {
    catalog: ResourceTypeCatalog,
    state: Mutex<ParameterState>,
}

impl InMemorySearchParameters {
    pub fn new(catalog: ResourceTypeCatalog) -> Self {
        Self {
            catalog,
            state: Mutex::new(ParameterState::default()),
        }
    }

    pub fn catalog(&self) -> &ResourceTypeCatalog {
        &self.catalog
    }

    /// Registers a definition with its initial status.
    pub fn add(&self, mut info: SearchParameterInfo, status: SearchParameterStatus) {
        info.is_searchable = status == SearchParameterStatus::Enabled;
        let mut state = self.state.lock();
        state.statuses.insert(
            info.url.clone(),
            ResourceSearchParameterStatus {
                url: info.url.clone(),
                status,
                last_updated: Utc::now(),
            },
        );
        state.definitions.insert(info.url.clone(), info);
    }

    pub fn status_of(&self, url: &str) -> Option<SearchParameterStatus> {
        self.state.lock().statuses.get(url).map(|s| s.status)
    }

    /// Stages a status change that becomes visible on the next
    /// `get_and_apply_search_parameter_updates`.
    pub fn stage_external_update(&self, url: &str, status: SearchParameterStatus) {
        self.state.lock().pending.push((url.to_string(), status));
    }

    pub fn history(&self) -> Vec<(String, SearchParameterStatus)> {
        self.state.lock().history.clone()
    }

    fn apply(state: &mut ParameterState, url: &str, status: SearchParameterStatus) -> bool {
        let now = Utc::now();
        let changed = match state.statuses.get_mut(url) {
            Some(existing) if existing.status == status => false,
            Some(existing) => {
                existing.status = status;
                existing.last_updated = now;
                true
            }
            None => {
                state.statuses.insert(
                    url.to_string(),
                    ResourceSearchParameterStatus {
                        url: url.to_string(),
                        status,
                        last_updated: now,
                    },
                );
                true
            }
        };
        if let Some(definition) = state.definitions.get_mut(url) {
            definition.is_searchable = status == SearchParameterStatus::Enabled;
        }
        changed
    }

    fn is_indexed(state: &ParameterState, url: &str) -> bool {
        matches!(
            state.statuses.get(url).map(|s| s.status),
            Some(SearchParameterStatus::Supported | SearchParameterStatus::Enabled)
        )
    }
}

impl SearchParameterDefinitionManager for InMemorySearchParameters {
    fn all_search_parameters(&self) -> Vec<SearchParameterInfo> {
        self.state.lock().definitions.values().cloned().collect()
    }

    fn get_search_parameter(&self, url: &str) -> Option<SearchParameterInfo> {
        self.state.lock().definitions.get(url).cloned()
    }

    fn indexed_parameters_for(&self, resource_type: &str) -> Vec<SearchParameterInfo> {
        let state = self.state.lock();
        state
            .definitions
            .values()
            .filter(|p| Self::is_indexed(&state, &p.url))
            .filter(|p| {
                self.catalog
                    .closure(p.base_resource_types.iter().map(String::as_str))
                    .contains(resource_type)
            })
            .cloned()
            .collect()
    }

    fn search_parameter_hash(&self, resource_type: &str) -> String {
        search_parameter_hash(&self.indexed_parameters_for(resource_type))
    }
}

#[async_trait]
impl SearchParameterStatusManager for InMemorySearchParameters {
    async fn get_all_statuses(&self) -> Result<Vec<ResourceSearchParameterStatus>, StoreError> {
        Ok(self.state.lock().statuses.values().cloned().collect())
    }

    async fn update_statuses(
        &self,
        urls: &[String],
        status: SearchParameterStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        for url in urls {
            Self::apply(&mut state, url, status);
            state.history.push((url.clone(), status));
        }
        debug!(count = urls.len(), %status, "Updated search parameter statuses");
        Ok(())
    }

    async fn get_and_apply_search_parameter_updates(&self) -> Result<usize, StoreError> {
        let mut state = self.state.lock();
        let pending = std::mem::take(&mut state.pending);
        let mut changed = 0;
        for (url, status) in pending {
            if Self::apply(&mut state, &url, status) {
                changed += 1;
            }
        }
        Ok(changed)
    }
}
