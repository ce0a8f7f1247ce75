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

//! Request handlers for creating, reading, canceling and running jobs.

use chrono::Utc;
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::context::ReindexContext;
use crate::error::ReindexError;
use crate::models::{JobParameters, JobRecordWrapper, ReindexJobRecord, VersionTag};
use crate::retry::retry_on_conflict;
use crate::task::ReindexJobTask;

pub const MAX_CONCURRENCY_RANGE: RangeInclusive<u16> = 1..=10;
pub const QUERY_DELAY_RANGE_MS: RangeInclusive<u64> = 0..=500_000;
pub const TARGET_DATA_STORE_USAGE_RANGE: RangeInclusive<u8> = 0..=100;
pub const RESOURCES_PER_QUERY_RANGE: RangeInclusive<u32> = 1..=5_000;

/// Validates and persists a new `Queued` job.
pub struct CreateReindexHandler {
    ctx: ReindexContext,
}

impl CreateReindexHandler {
    pub fn new(ctx: ReindexContext) -> Self {
        Self { ctx }
    }

    pub async fn handle(&self, request: JobParameters) -> Result<JobRecordWrapper, ReindexError> {
        let errors = self.validate(&request);
        if !errors.is_empty() {
            return Err(ReindexError::Validation(errors));
        }

        if let Some(job_id) = self.ctx.job_store.check_active_jobs_exist().await? {
            return Err(ReindexError::ActiveJobExists { job_id });
        }

        let config = &self.ctx.config;
        let targets: Vec<String> = request
            .target_resource_types
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let record = ReindexJobRecord::new(
            Uuid::new_v4().to_string(),
            targets,
            request
                .max_concurrency
                .unwrap_or_else(|| config.default_max_concurrency()),
            request
                .query_delay_interval_ms
                .unwrap_or_else(|| config.default_query_delay().as_millis() as u64),
            request
                .maximum_number_of_resources_per_query
                .unwrap_or_else(|| config.max_resources_per_query()),
            request
                .target_data_store_usage_percentage
                .or_else(|| config.default_target_data_store_usage()),
        );

        let created = self.ctx.job_store.create_job(record).await?;
        info!(job_id = %created.record.id, "Created reindex job");
        metrics::counter!("reindex_jobs_created_total").increment(1);
        Ok(created)
    }

    fn validate(&self, request: &JobParameters) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some(value) = request.max_concurrency {
            if !MAX_CONCURRENCY_RANGE.contains(&value) {
                errors.push(format!(
                    "maxConcurrency must be between {} and {}, got {value}",
                    MAX_CONCURRENCY_RANGE.start(),
                    MAX_CONCURRENCY_RANGE.end()
                ));
            }
        }
        if let Some(value) = request.query_delay_interval_ms {
            if !QUERY_DELAY_RANGE_MS.contains(&value) {
                errors.push(format!(
                    "queryDelayIntervalInMilliseconds must be between {} and {}, got {value}",
                    QUERY_DELAY_RANGE_MS.start(),
                    QUERY_DELAY_RANGE_MS.end()
                ));
            }
        }
        if let Some(value) = request.target_data_store_usage_percentage {
            if !TARGET_DATA_STORE_USAGE_RANGE.contains(&value) {
                errors.push(format!(
                    "targetDataStoreUsagePercentage must be between {} and {}, got {value}",
                    TARGET_DATA_STORE_USAGE_RANGE.start(),
                    TARGET_DATA_STORE_USAGE_RANGE.end()
                ));
            }
        }
        if let Some(value) = request.maximum_number_of_resources_per_query {
            if !RESOURCES_PER_QUERY_RANGE.contains(&value) {
                errors.push(format!(
                    "maximumNumberOfResourcesPerQuery must be between {} and {}, got {value}",
                    RESOURCES_PER_QUERY_RANGE.start(),
                    RESOURCES_PER_QUERY_RANGE.end()
                ));
            }
        }
        for resource_type in &request.target_resource_types {
            if !self.ctx.catalog.contains(resource_type) {
                errors.push(format!("Unknown resource type {resource_type}"));
            }
        }
        errors
    }
}

pub struct GetReindexHandler {
    ctx: ReindexContext,
}

impl GetReindexHandler {
    pub fn new(ctx: ReindexContext) -> Self {
        Self { ctx }
    }

    pub async fn handle(&self, job_id: &str) -> Result<JobRecordWrapper, ReindexError> {
        Ok(self.ctx.job_store.get_job_by_id(job_id).await?)
    }
}

/// Moves a job to `Canceled`, retrying on version conflicts.
///
/// A running task observes the change the next time it reads or writes the
/// record and stops its work-units.
pub struct CancelReindexHandler {
    ctx: ReindexContext,
}

impl CancelReindexHandler {
    pub fn new(ctx: ReindexContext) -> Self {
        Self { ctx }
    }

    pub async fn handle(&self, job_id: &str) -> Result<JobRecordWrapper, ReindexError> {
        let config = &self.ctx.config;
        let store = self.ctx.job_store.clone();
        let canceled = retry_on_conflict(
            config.conflict_retry_attempts(),
            config.conflict_retry_base_delay(),
            || {
                let store = store.clone();
                async move {
                    let mut current = store.get_job_by_id(job_id).await?;
                    if current.record.status.is_terminal() {
                        return Err(ReindexError::Validation(vec![format!(
                            "Job {} is already {} and cannot be canceled",
                            job_id, current.record.status
                        )]));
                    }
                    current.record.mark_canceled(Utc::now());
                    Ok(store.update_job(&current.record, &current.version).await?)
                }
            },
        )
        .await?;
        info!(job_id = %job_id, "Canceled reindex job");
        Ok(canceled)
    }
}

/// Runs a job given its id and the version tag the caller read.
pub struct ReindexJobHandler {
    ctx: ReindexContext,
}

impl ReindexJobHandler {
    pub fn new(ctx: ReindexContext) -> Self {
        Self { ctx }
    }

    /// Executes the job with a fresh task. A terminal job is returned as is.
    pub async fn handle(
        &self,
        job_id: &str,
        version: &VersionTag,
        cancel: CancellationToken,
    ) -> Result<JobRecordWrapper, ReindexError> {
        let current = self.ctx.job_store.get_job_by_id(job_id).await?;
        if &current.version != version {
            return Err(ReindexError::Conflict {
                job_id: job_id.to_string(),
            });
        }
        if current.record.status.is_terminal() {
            return Ok(current);
        }
        ReindexJobTask::new(self.ctx.clone()).execute(current, cancel).await
    }
}
