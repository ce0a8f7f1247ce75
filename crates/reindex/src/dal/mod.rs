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

//! Data access contracts consumed by the reindex engine.
//!
//! The engine never talks to a database directly. Everything it needs from
//! storage goes through the narrow traits below:
//!
//! - [`JobStore`] persists job records under optimistic concurrency
//! - [`QueueClient`] is the generic distributed job queue
//! - [`SearchService`] runs count-only and paged reindex queries
//! - [`ResourceStore`] writes recomputed search indices
//! - [`SearchParameterDefinitionManager`] and [`SearchParameterStatusManager`]
//!   expose search parameter metadata and lifecycle state
//! - [`DataStoreUsageSampler`] reports datastore utilization for throttling
//!
//! [`memory`] contains complete in-process implementations of each.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::StoreError;
use crate::models::{
    JobInfo, JobRecordWrapper, QueueType, ReindexJobRecord, ResourceSearchParameterStatus,
    ResourceWrapper, SearchParameterInfo, SearchParameterStatus, VersionTag,
};

pub mod memory;

/// Persistence for reindex job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Stores a new record and returns it with its first version tag.
    async fn create_job(&self, record: ReindexJobRecord) -> Result<JobRecordWrapper, StoreError>;

    async fn get_job_by_id(&self, job_id: &str) -> Result<JobRecordWrapper, StoreError>;

    /// Replaces the stored record. Fails with [`StoreError::Conflict`] when
    /// `version` is stale. Every successful write refreshes the heartbeat.
    async fn update_job(
        &self,
        record: &ReindexJobRecord,
        version: &VersionTag,
    ) -> Result<JobRecordWrapper, StoreError>;

    /// Atomically claims up to `max_count` records that are queued, or running
    /// with a heartbeat older than `stale_threshold`. Claimed records are
    /// returned as `Running` with a fresh version tag.
    async fn acquire_jobs(
        &self,
        max_count: usize,
        stale_threshold: Duration,
    ) -> Result<Vec<JobRecordWrapper>, StoreError>;

    /// The id of a queued or running job, if any.
    async fn check_active_jobs_exist(&self) -> Result<Option<String>, StoreError>;
}

/// How a dequeued job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobCompletion {
    Succeeded(String),
    Failed(String),
    Cancelled,
    /// Return the job to `Created` for another attempt.
    Rearm,
}

/// The generic distributed job queue.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Enqueues definitions under `group_id`, or under a new group whose id
    /// is the first new job's id when `group_id` is `None`.
    async fn enqueue(
        &self,
        queue_type: QueueType,
        definitions: Vec<String>,
        group_id: Option<i64>,
    ) -> Result<Vec<JobInfo>, StoreError>;

    /// Claims the oldest created job, or a running job whose heartbeat is
    /// older than `heartbeat_timeout`.
    async fn dequeue(
        &self,
        queue_type: QueueType,
        heartbeat_timeout: Duration,
    ) -> Result<Option<JobInfo>, StoreError>;

    async fn get_job_by_id(&self, queue_type: QueueType, job_id: i64)
        -> Result<Option<JobInfo>, StoreError>;

    async fn get_jobs_by_group_id(
        &self,
        queue_type: QueueType,
        group_id: i64,
    ) -> Result<Vec<JobInfo>, StoreError>;

    /// Flags every job in the group for cancellation; created jobs are
    /// cancelled immediately.
    async fn cancel_jobs_by_group_id(
        &self,
        queue_type: QueueType,
        group_id: i64,
    ) -> Result<(), StoreError>;

    /// Refreshes the heartbeat. Returns whether cancellation was requested.
    async fn put_heartbeat(&self, job: &JobInfo) -> Result<bool, StoreError>;

    async fn complete_job(&self, job: &JobInfo, completion: JobCompletion)
        -> Result<(), StoreError>;
}

/// Slice of a resource type's rows addressed by a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ReindexRange {
    /// Inclusive surrogate-id bounds.
    SurrogateId { start: i64, end: i64 },
    /// Position-based window over the type's rows in surrogate order, used on
    /// engines without surrogate range support.
    Offset { skip: u64, take: u64 },
}

/// A reindex query against one resource type.
#[derive(Debug, Clone, PartialEq)]
pub struct ReindexQuery {
    pub resource_type: String,
    /// Only resources whose stored hash differs from this one are returned.
    /// An empty hash matches every resource.
    pub search_parameter_hash: String,
    pub continuation_token: Option<String>,
    pub range: Option<ReindexRange>,
    pub count_only: bool,
    pub max_results: u32,
}

impl ReindexQuery {
    pub fn count(resource_type: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            search_parameter_hash: hash.into(),
            continuation_token: None,
            range: None,
            count_only: true,
            max_results: 0,
        }
    }

    /// Counts every resource of a type regardless of its index state.
    pub fn count_all(resource_type: impl Into<String>) -> Self {
        Self::count(resource_type, String::new())
    }

    pub fn page(
        resource_type: impl Into<String>,
        hash: impl Into<String>,
        continuation_token: Option<String>,
        max_results: u32,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            search_parameter_hash: hash.into(),
            continuation_token,
            range: None,
            count_only: false,
            max_results,
        }
    }

    pub fn with_range(mut self, range: ReindexRange) -> Self {
        self.range = Some(range);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReindexSearchResult {
    pub resources: Vec<ResourceWrapper>,
    pub continuation_token: Option<String>,
    pub total_count: Option<u64>,
    /// Surrogate-id bounds of the matching rows, on surrogate-ordered engines.
    pub surrogate_range: Option<(i64, i64)>,
}

/// Search execution for reindex queries.
#[async_trait]
pub trait SearchService: Send + Sync {
    /// Whether rows can be range-partitioned by surrogate id.
    fn supports_surrogate_ordering(&self) -> bool;

    async fn search_for_reindex(
        &self,
        query: &ReindexQuery,
    ) -> Result<ReindexSearchResult, StoreError>;

    /// Splits `[start_id, end_id]` of a resource type into contiguous ranges
    /// holding at most `range_size` rows each.
    async fn get_surrogate_id_ranges(
        &self,
        resource_type: &str,
        start_id: i64,
        end_id: i64,
        range_size: u64,
    ) -> Result<Vec<(i64, i64)>, StoreError>;
}

/// Resource persistence for recomputed indices.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Replaces the search indices and search-parameter hash of each
    /// resource. Must not change the resource's version or last-modified
    /// time. Returns the number of resources written.
    async fn bulk_update_search_indices(
        &self,
        resources: Vec<ResourceWrapper>,
    ) -> Result<usize, StoreError>;
}

/// Search parameter definitions.
pub trait SearchParameterDefinitionManager: Send + Sync {
    fn all_search_parameters(&self) -> Vec<SearchParameterInfo>;

    fn get_search_parameter(&self, url: &str) -> Option<SearchParameterInfo>;

    /// Parameters whose values should currently be indexed for `resource_type`.
    fn indexed_parameters_for(&self, resource_type: &str) -> Vec<SearchParameterInfo>;

    /// Hash identifying the current indexed parameter set of `resource_type`.
    fn search_parameter_hash(&self, resource_type: &str) -> String;
}

/// Authoritative search parameter lifecycle state.
#[async_trait]
pub trait SearchParameterStatusManager: Send + Sync {
    async fn get_all_statuses(&self) -> Result<Vec<ResourceSearchParameterStatus>, StoreError>;

    /// Writes `status` for every url in one batch.
    async fn update_statuses(
        &self,
        urls: &[String],
        status: SearchParameterStatus,
    ) -> Result<(), StoreError>;

    /// Pulls status changes made by other server instances and applies them
    /// locally. Returns the number of parameters changed.
    async fn get_and_apply_search_parameter_updates(&self) -> Result<usize, StoreError>;
}

/// Datastore utilization sampler.
#[async_trait]
pub trait DataStoreUsageSampler: Send + Sync {
    /// Provisioned capacity in the same unit as samples, when known.
    fn provisioned_capacity(&self) -> Option<f64>;

    /// Current utilization. With a provisioned capacity this is in absolute
    /// units, otherwise in percent.
    async fn sample_usage(&self) -> Option<f64>;
}
