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

//! Configuration for the reindex engine.
//!
//! # Construction
//!
//! ```rust,ignore
//! let config = ReindexConfig::builder()
//!     .max_running_jobs(2)
//!     .job_heartbeat_timeout(Duration::from_secs(300))
//!     .build();
//! ```

use std::time::Duration;

/// Engine-wide knobs shared by the task engine, the polling scheduler and the
/// distributed jobs. Per-job knobs (concurrency, query delay, target
/// utilization) live on the job record and default from here.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ReindexConfig {
    max_running_jobs: usize,
    polling_frequency: Duration,
    job_heartbeat_timeout: Duration,
    consecutive_failures_threshold: u32,
    max_resources_per_query: u32,
    max_resources_per_write: usize,
    default_max_concurrency: u16,
    default_query_delay: Duration,
    default_target_data_store_usage: Option<u8>,
    conflict_retry_attempts: u32,
    conflict_retry_base_delay: Duration,
    processing_timeout_retries: u32,
    orchestrator_poll_floor: Duration,
    orchestrator_poll_ceiling: Duration,
    orchestrator_stable_cycles: u32,
    throttle_sample_window: usize,
    max_issues: usize,
    host_max_concurrent_jobs: usize,
    host_poll_interval: Duration,
}

impl ReindexConfig {
    /// Creates a new configuration builder with default values.
    pub fn builder() -> ReindexConfigBuilder {
        ReindexConfigBuilder::default()
    }

    /// Maximum number of jobs a single scheduler runs at once.
    pub fn max_running_jobs(&self) -> usize {
        self.max_running_jobs
    }

    /// Pause between polling scheduler iterations.
    pub fn polling_frequency(&self) -> Duration {
        self.polling_frequency
    }

    /// A job or work-unit not refreshed within this window is considered stale.
    pub fn job_heartbeat_timeout(&self) -> Duration {
        self.job_heartbeat_timeout
    }

    /// Failures tolerated for a work-unit (or consecutively for a job)
    /// before the job is failed.
    pub fn consecutive_failures_threshold(&self) -> u32 {
        self.consecutive_failures_threshold
    }

    /// Page size requested per reindex query.
    pub fn max_resources_per_query(&self) -> u32 {
        self.max_resources_per_query
    }

    /// Number of resources written per index update batch.
    pub fn max_resources_per_write(&self) -> usize {
        self.max_resources_per_write
    }

    pub fn default_max_concurrency(&self) -> u16 {
        self.default_max_concurrency
    }

    pub fn default_query_delay(&self) -> Duration {
        self.default_query_delay
    }

    pub fn default_target_data_store_usage(&self) -> Option<u8> {
        self.default_target_data_store_usage
    }

    /// Attempts made on a version conflict before it is surfaced.
    pub fn conflict_retry_attempts(&self) -> u32 {
        self.conflict_retry_attempts
    }

    pub fn conflict_retry_base_delay(&self) -> Duration {
        self.conflict_retry_base_delay
    }

    /// Query timeouts a processing job absorbs before failing outright.
    pub fn processing_timeout_retries(&self) -> u32 {
        self.processing_timeout_retries
    }

    pub fn orchestrator_poll_floor(&self) -> Duration {
        self.orchestrator_poll_floor
    }

    pub fn orchestrator_poll_ceiling(&self) -> Duration {
        self.orchestrator_poll_ceiling
    }

    /// Unchanged watch cycles before the orchestrator backs off its polling.
    pub fn orchestrator_stable_cycles(&self) -> u32 {
        self.orchestrator_stable_cycles
    }

    /// Samples folded into the throttle moving average.
    pub fn throttle_sample_window(&self) -> usize {
        self.throttle_sample_window
    }

    /// Upper bound on issues kept on a job record.
    pub fn max_issues(&self) -> usize {
        self.max_issues
    }

    /// Processing jobs a queue host runs at once. Orchestrators are not
    /// counted against this limit.
    pub fn host_max_concurrent_jobs(&self) -> usize {
        self.host_max_concurrent_jobs
    }

    /// Wait between dequeue attempts when a queue host finds no work.
    pub fn host_poll_interval(&self) -> Duration {
        self.host_poll_interval
    }
}

impl Default for ReindexConfig {
    fn default() -> Self {
        ReindexConfigBuilder::default().build()
    }
}

/// Builder for [`ReindexConfig`].
#[derive(Debug, Clone)]
pub struct ReindexConfigBuilder {
    config: ReindexConfig,
}

impl Default for ReindexConfigBuilder {
    fn default() -> Self {
        Self {
            config: ReindexConfig {
                max_running_jobs: 1,
                polling_frequency: Duration::from_secs(60),
                job_heartbeat_timeout: Duration::from_secs(600),
                consecutive_failures_threshold: 5,
                max_resources_per_query: 100,
                max_resources_per_write: 100,
                default_max_concurrency: 1,
                default_query_delay: Duration::from_millis(500),
                default_target_data_store_usage: None,
                conflict_retry_attempts: 3,
                conflict_retry_base_delay: Duration::from_millis(100),
                processing_timeout_retries: 3,
                orchestrator_poll_floor: Duration::from_secs(1),
                orchestrator_poll_ceiling: Duration::from_secs(60),
                orchestrator_stable_cycles: 3,
                throttle_sample_window: 5,
                max_issues: 50,
                host_max_concurrent_jobs: 4,
                host_poll_interval: Duration::from_secs(1),
            },
        }
    }
}

impl ReindexConfigBuilder {
    pub fn max_running_jobs(mut self, value: usize) -> Self {
        self.config.max_running_jobs = value;
        self
    }

    pub fn polling_frequency(mut self, value: Duration) -> Self {
        self.config.polling_frequency = value;
        self
    }

    pub fn job_heartbeat_timeout(mut self, value: Duration) -> Self {
        self.config.job_heartbeat_timeout = value;
        self
    }

    pub fn consecutive_failures_threshold(mut self, value: u32) -> Self {
        self.config.consecutive_failures_threshold = value;
        self
    }

    pub fn max_resources_per_query(mut self, value: u32) -> Self {
        self.config.max_resources_per_query = value;
        self
    }

    pub fn max_resources_per_write(mut self, value: usize) -> Self {
        self.config.max_resources_per_write = value;
        self
    }

    pub fn default_max_concurrency(mut self, value: u16) -> Self {
        self.config.default_max_concurrency = value;
        self
    }

    pub fn default_query_delay(mut self, value: Duration) -> Self {
        self.config.default_query_delay = value;
        self
    }

    pub fn default_target_data_store_usage(mut self, value: Option<u8>) -> Self {
        self.config.default_target_data_store_usage = value;
        self
    }

    pub fn conflict_retry_attempts(mut self, value: u32) -> Self {
        self.config.conflict_retry_attempts = value;
        self
    }

    pub fn conflict_retry_base_delay(mut self, value: Duration) -> Self {
        self.config.conflict_retry_base_delay = value;
        self
    }

    pub fn processing_timeout_retries(mut self, value: u32) -> Self {
        self.config.processing_timeout_retries = value;
        self
    }

    pub fn orchestrator_poll_floor(mut self, value: Duration) -> Self {
        self.config.orchestrator_poll_floor = value;
        self
    }

    pub fn orchestrator_poll_ceiling(mut self, value: Duration) -> Self {
        self.config.orchestrator_poll_ceiling = value;
        self
    }

    pub fn orchestrator_stable_cycles(mut self, value: u32) -> Self {
        self.config.orchestrator_stable_cycles = value;
        self
    }

    pub fn throttle_sample_window(mut self, value: usize) -> Self {
        self.config.throttle_sample_window = value;
        self
    }

    pub fn max_issues(mut self, value: usize) -> Self {
        self.config.max_issues = value;
        self
    }

    pub fn host_max_concurrent_jobs(mut self, value: usize) -> Self {
        self.config.host_max_concurrent_jobs = value;
        self
    }

    pub fn host_poll_interval(mut self, value: Duration) -> Self {
        self.config.host_poll_interval = value;
        self
    }

    /// Builds the configuration. Zero-valued limits are raised to one so the
    /// engine can always make progress.
    pub fn build(mut self) -> ReindexConfig {
        self.config.max_running_jobs = self.config.max_running_jobs.max(1);
        self.config.consecutive_failures_threshold =
            self.config.consecutive_failures_threshold.max(1);
        self.config.max_resources_per_query = self.config.max_resources_per_query.max(1);
        self.config.max_resources_per_write = self.config.max_resources_per_write.max(1);
        self.config.default_max_concurrency = self.config.default_max_concurrency.max(1);
        self.config.throttle_sample_window = self.config.throttle_sample_window.max(1);
        self.config.max_issues = self.config.max_issues.max(1);
        self.config.host_max_concurrent_jobs = self.config.host_max_concurrent_jobs.max(1);
        if self.config.orchestrator_poll_ceiling < self.config.orchestrator_poll_floor {
            self.config.orchestrator_poll_ceiling = self.config.orchestrator_poll_floor;
        }
        self.config
    }
}
