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

//! In-memory resource repository implementing search and index writes.
//!
//! Continuation tokens are the surrogate id of the last row returned, so a
//! page boundary stays stable while earlier rows are being rewritten.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;

use crate::dal::{ReindexQuery, ReindexRange, ReindexSearchResult, ResourceStore, SearchService};
use crate::error::StoreError;
use crate::models::ResourceWrapper;

/// Kind of failure injected into upcoming queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Timeout,
    Unavailable,
}

#[derive(Default)]
struct StoreState {
    next_surrogate_id: i64,
    /// Keyed by surrogate id, which is unique across types.
    resources: BTreeMap<i64, ResourceWrapper>,
    injected: Vec<(Option<String>, InjectedFailure)>,
    queries: usize,
    writes: usize,
}

pub struct InMemoryFhirStore {
    state: Mutex<StoreState>,
    surrogate_ordering: bool,
}

impl Default for InMemoryFhirStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFhirStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            surrogate_ordering: true,
        }
    }

    /// A store that cannot range-partition by surrogate id.
    pub fn without_surrogate_ordering() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            surrogate_ordering: false,
        }
    }

    /// Adds a resource that has never been indexed.
    pub fn insert(&self, resource_type: &str, resource_id: &str, raw: serde_json::Value) -> i64 {
        let mut state = self.state.lock();
        state.next_surrogate_id += 1;
        let surrogate_id = state.next_surrogate_id;
        state.resources.insert(
            surrogate_id,
            ResourceWrapper {
                resource_type: resource_type.to_string(),
                resource_id: resource_id.to_string(),
                surrogate_id,
                version: 1,
                last_modified: Utc::now(),
                raw,
                search_parameter_hash: None,
                search_indices: Vec::new(),
            },
        );
        surrogate_id
    }

    /// Inserts `count` generated resources of one type.
    pub fn seed(&self, resource_type: &str, count: usize) {
        for i in 0..count {
            let id = format!("{}-{}", resource_type.to_lowercase(), i);
            self.insert(
                resource_type,
                &id,
                serde_json::json!({ "resourceType": resource_type, "id": id }),
            );
        }
    }

    /// Makes the next page query or index write (optionally only for one
    /// resource type) fail. Count-only queries are never affected.
    pub fn inject_failure(&self, resource_type: Option<&str>, failure: InjectedFailure) {
        self.state
            .lock()
            .injected
            .push((resource_type.map(str::to_string), failure));
    }

    pub fn resources_of(&self, resource_type: &str) -> Vec<ResourceWrapper> {
        self.state
            .lock()
            .resources
            .values()
            .filter(|r| r.resource_type == resource_type)
            .cloned()
            .collect()
    }

    pub fn query_count(&self) -> usize {
        self.state.lock().queries
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    fn take_injected(state: &mut StoreState, resource_type: &str) -> Option<InjectedFailure> {
        let position = state
            .injected
            .iter()
            .position(|(rt, _)| rt.as_deref().map_or(true, |rt| rt == resource_type))?;
        Some(state.injected.remove(position).1)
    }
}

#[async_trait]
impl SearchService for InMemoryFhirStore {
    fn supports_surrogate_ordering(&self) -> bool {
        self.surrogate_ordering
    }

    async fn search_for_reindex(
        &self,
        query: &ReindexQuery,
    ) -> Result<ReindexSearchResult, StoreError> {
        let mut state = self.state.lock();
        state.queries += 1;
        let injected = if query.count_only {
            None
        } else {
            Self::take_injected(&mut state, &query.resource_type)
        };
        if let Some(failure) = injected {
            let message = format!("reindex query on {}", query.resource_type);
            return Err(match failure {
                InjectedFailure::Timeout => StoreError::Timeout(message),
                InjectedFailure::Unavailable => StoreError::Unavailable(message),
            });
        }

        let of_type = state
            .resources
            .values()
            .filter(|r| r.resource_type == query.resource_type);
        let windowed: Vec<&ResourceWrapper> = match query.range {
            Some(ReindexRange::SurrogateId { start, end }) => of_type
                .filter(|r| r.surrogate_id >= start && r.surrogate_id <= end)
                .collect(),
            Some(ReindexRange::Offset { skip, take }) => of_type
                .skip(usize::try_from(skip).unwrap_or(usize::MAX))
                .take(usize::try_from(take).unwrap_or(usize::MAX))
                .collect(),
            None => of_type.collect(),
        };

        let after: i64 = match &query.continuation_token {
            Some(token) => token
                .parse()
                .map_err(|_| StoreError::Unavailable(format!("bad continuation token {token}")))?,
            None => i64::MIN,
        };
        let stale: Vec<&ResourceWrapper> = windowed
            .into_iter()
            .filter(|r| r.surrogate_id > after)
            .filter(|r| {
                query.search_parameter_hash.is_empty()
                    || r.search_parameter_hash.as_deref()
                        != Some(query.search_parameter_hash.as_str())
            })
            .collect();

        let surrogate_range = match (stale.first(), stale.last()) {
            (Some(first), Some(last)) if self.surrogate_ordering => {
                Some((first.surrogate_id, last.surrogate_id))
            }
            _ => None,
        };

        if query.count_only {
            return Ok(ReindexSearchResult {
                resources: Vec::new(),
                continuation_token: None,
                total_count: Some(stale.len() as u64),
                surrogate_range,
            });
        }

        let limit = query.max_results.max(1) as usize;
        let page: Vec<ResourceWrapper> = stale.iter().take(limit).map(|r| (*r).clone()).collect();
        let continuation_token = if stale.len() > limit {
            page.last().map(|r| r.surrogate_id.to_string())
        } else {
            None
        };
        Ok(ReindexSearchResult {
            resources: page,
            continuation_token,
            total_count: None,
            surrogate_range,
        })
    }

    async fn get_surrogate_id_ranges(
        &self,
        resource_type: &str,
        start_id: i64,
        end_id: i64,
        range_size: u64,
    ) -> Result<Vec<(i64, i64)>, StoreError> {
        let state = self.state.lock();
        let ids: Vec<i64> = state
            .resources
            .values()
            .filter(|r| {
                r.resource_type == resource_type
                    && r.surrogate_id >= start_id
                    && r.surrogate_id <= end_id
            })
            .map(|r| r.surrogate_id)
            .collect();
        let chunk = usize::try_from(range_size.max(1)).unwrap_or(usize::MAX);
        Ok(ids
            .chunks(chunk)
            .filter_map(|c| Some((*c.first()?, *c.last()?)))
            .collect())
    }
}

#[async_trait]
impl ResourceStore for InMemoryFhirStore {
    async fn bulk_update_search_indices(
        &self,
        resources: Vec<ResourceWrapper>,
    ) -> Result<usize, StoreError> {
        let mut state = self.state.lock();
        if let Some(failure) = resources
            .first()
            .and_then(|r| Self::take_injected(&mut state, &r.resource_type))
        {
            return Err(match failure {
                InjectedFailure::Timeout => StoreError::Timeout("index write".into()),
                InjectedFailure::Unavailable => StoreError::Unavailable("index write".into()),
            });
        }
        let mut written = 0;
        for resource in resources {
            if let Some(stored) = state.resources.get_mut(&resource.surrogate_id) {
                stored.search_indices = resource.search_indices;
                stored.search_parameter_hash = resource.search_parameter_hash;
                written += 1;
            }
        }
        state.writes += written;
        Ok(written)
    }
}
