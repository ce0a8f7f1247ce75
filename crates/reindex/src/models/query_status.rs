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

//! The query status ledger: one entry per work-unit of a reindex job.
//!
//! A work-unit is a resource type plus the continuation token that resumes
//! its query. Entries are only mutated by the worker executing them or by the
//! stale-recovery sweep. Completed entries are evicted oldest-first once more
//! than [`MAX_COMPLETED_QUERIES`] accumulate so the persisted record stays
//! small.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Completed entries retained in the ledger.
pub const MAX_COMPLETED_QUERIES: usize = 10;

/// State of a single work-unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl QueryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryState::Queued => "Queued",
            QueryState::Running => "Running",
            QueryState::Completed => "Completed",
            QueryState::Failed => "Failed",
        }
    }
}

/// Identity of a work-unit inside the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey {
    pub resource_type: String,
    pub continuation_token: Option<String>,
}

impl QueryKey {
    pub fn new(resource_type: impl Into<String>, continuation_token: Option<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            continuation_token,
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.continuation_token {
            Some(token) => write!(f, "{}@{}", self.resource_type, token),
            None => write!(f, "{}@start", self.resource_type),
        }
    }
}

/// One work-unit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReindexJobQueryStatus {
    pub resource_type: String,
    pub continuation_token: Option<String>,
    pub status: QueryState,
    pub last_modified: DateTime<Utc>,
    pub error: Option<String>,
    pub failure_count: u32,
    /// Set once the continuation child of this unit has been queued.
    pub created_child: bool,
}

impl ReindexJobQueryStatus {
    pub fn key(&self) -> QueryKey {
        QueryKey::new(self.resource_type.clone(), self.continuation_token.clone())
    }

    fn matches(&self, key: &QueryKey) -> bool {
        self.resource_type == key.resource_type && self.continuation_token == key.continuation_token
    }
}

/// Ordered collection of work-units embedded in the job record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryStatusLedger {
    entries: Vec<ReindexJobQueryStatus>,
}

impl QueryStatusLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReindexJobQueryStatus> {
        self.entries.iter()
    }

    pub fn get(&self, key: &QueryKey) -> Option<&ReindexJobQueryStatus> {
        self.entries.iter().find(|e| e.matches(key))
    }

    fn get_mut(&mut self, key: &QueryKey) -> Option<&mut ReindexJobQueryStatus> {
        self.entries.iter_mut().find(|e| e.matches(key))
    }

    /// Adds a `Queued` unit. Returns `false` when the key already exists.
    pub fn add_queued(&mut self, key: QueryKey, now: DateTime<Utc>) -> bool {
        if self.get(&key).is_some() {
            return false;
        }
        self.entries.push(ReindexJobQueryStatus {
            resource_type: key.resource_type,
            continuation_token: key.continuation_token,
            status: QueryState::Queued,
            last_modified: now,
            error: None,
            failure_count: 0,
            created_child: false,
        });
        true
    }

    /// The oldest `Queued` unit, ties broken by insertion order.
    pub fn next_queued(&self) -> Option<QueryKey> {
        self.entries
            .iter()
            .filter(|e| e.status == QueryState::Queued)
            .min_by_key(|e| e.last_modified)
            .map(ReindexJobQueryStatus::key)
    }

    /// Moves a `Queued` unit to `Running`. Returns `false` if the unit is
    /// missing or not queued.
    pub fn mark_running(&mut self, key: &QueryKey, now: DateTime<Utc>) -> bool {
        match self.get_mut(key) {
            Some(entry) if entry.status == QueryState::Queued => {
                entry.status = QueryState::Running;
                entry.last_modified = now;
                true
            }
            _ => false,
        }
    }

    /// Refreshes the heartbeat of a running unit.
    pub fn touch(&mut self, key: &QueryKey, now: DateTime<Utc>) {
        if let Some(entry) = self.get_mut(key) {
            if entry.status == QueryState::Running {
                entry.last_modified = now;
            }
        }
    }

    /// Queues the continuation child of `parent` unless one was already
    /// spawned. Returns `true` when a child was added.
    pub fn spawn_child(
        &mut self,
        parent: &QueryKey,
        continuation_token: String,
        now: DateTime<Utc>,
    ) -> bool {
        let resource_type = match self.get_mut(parent) {
            Some(entry) if !entry.created_child => {
                entry.created_child = true;
                entry.resource_type.clone()
            }
            _ => return false,
        };
        self.add_queued(QueryKey::new(resource_type, Some(continuation_token)), now)
    }

    /// Marks a unit `Completed`. Returns `true` only on the transition, so a
    /// caller counting progress never counts the same unit twice.
    pub fn mark_completed(&mut self, key: &QueryKey, now: DateTime<Utc>) -> bool {
        let transitioned = match self.get_mut(key) {
            Some(entry) if entry.status != QueryState::Completed => {
                entry.status = QueryState::Completed;
                entry.last_modified = now;
                entry.error = None;
                true
            }
            _ => false,
        };
        if transitioned {
            self.evict_completed();
        }
        transitioned
    }

    /// Records a failure and returns the unit's failure count.
    pub fn record_failure(&mut self, key: &QueryKey, error: &str, now: DateTime<Utc>) -> u32 {
        match self.get_mut(key) {
            Some(entry) => {
                entry.failure_count += 1;
                entry.error = Some(error.to_string());
                entry.last_modified = now;
                entry.failure_count
            }
            None => 0,
        }
    }

    pub fn mark_failed(&mut self, key: &QueryKey, now: DateTime<Utc>) {
        if let Some(entry) = self.get_mut(key) {
            entry.status = QueryState::Failed;
            entry.last_modified = now;
        }
    }

    /// Returns a unit to `Queued`.
    pub fn requeue(&mut self, key: &QueryKey, now: DateTime<Utc>) -> bool {
        match self.get_mut(key) {
            Some(entry) if entry.status != QueryState::Completed => {
                entry.status = QueryState::Queued;
                entry.last_modified = now;
                true
            }
            _ => false,
        }
    }

    /// Running units whose heartbeat is older than `timeout`.
    pub fn stale_running(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<QueryKey> {
        let timeout =
            chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::days(36_500));
        self.entries
            .iter()
            .filter(|e| e.status == QueryState::Running && now - e.last_modified > timeout)
            .map(ReindexJobQueryStatus::key)
            .collect()
    }

    pub fn count(&self, state: QueryState) -> usize {
        self.entries.iter().filter(|e| e.status == state).count()
    }

    /// Whether any unit is still queued or running.
    pub fn has_active(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.status, QueryState::Queued | QueryState::Running))
    }

    /// Units in the given state.
    pub fn keys_in(&self, state: QueryState) -> Vec<QueryKey> {
        self.entries
            .iter()
            .filter(|e| e.status == state)
            .map(ReindexJobQueryStatus::key)
            .collect()
    }

    /// Every unit reached `Completed`.
    pub fn all_completed(&self) -> bool {
        self.entries.iter().all(|e| e.status == QueryState::Completed)
    }

    fn evict_completed(&mut self) {
        let completed = self.count(QueryState::Completed);
        if completed <= MAX_COMPLETED_QUERIES {
            return;
        }
        let mut excess = completed - MAX_COMPLETED_QUERIES;
        let mut completed_by_age: Vec<(DateTime<Utc>, usize)> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status == QueryState::Completed)
            .map(|(i, e)| (e.last_modified, i))
            .collect();
        completed_by_age.sort();
        let mut evict: Vec<usize> = Vec::with_capacity(excess);
        for (_, index) in completed_by_age {
            if excess == 0 {
                break;
            }
            evict.push(index);
            excess -= 1;
        }
        evict.sort_unstable_by(|a, b| b.cmp(a));
        for index in evict {
            self.entries.remove(index);
        }
    }
}
