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

//! The persisted reindex job record.
//!
//! The record is owned by the orchestration layer and persisted by a
//! [`JobStore`](crate::dal::JobStore) under optimistic concurrency: every read
//! returns a [`VersionTag`] that must accompany the next write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::query_status::QueryStatusLedger;

/// Lifecycle of a reindex job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "Queued",
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::Canceled => "Canceled",
        }
    }

    /// Completed, failed and canceled jobs never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque optimistic-concurrency tag returned with every read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionTag(String);

impl VersionTag {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W/\"{}\"", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueSeverity {
    Information,
    Warning,
    Error,
}

/// A structured, user-visible issue attached to the job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobIssue {
    pub severity: IssueSeverity,
    pub code: String,
    pub diagnostics: String,
}

impl JobIssue {
    pub fn information(diagnostics: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Information,
            code: "informational".to_string(),
            diagnostics: diagnostics.into(),
        }
    }

    pub fn error(diagnostics: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Error,
            code: "exception".to_string(),
            diagnostics: diagnostics.into(),
        }
    }
}

/// Rows found for a resource type and the surrogate-id bounds they span.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTypeCount {
    pub count: u64,
    pub start_surrogate_id: Option<i64>,
    pub end_surrogate_id: Option<i64>,
}

/// A record and the version tag it was read with.
#[derive(Debug, Clone)]
pub struct JobRecordWrapper {
    pub record: ReindexJobRecord,
    pub version: VersionTag,
}

/// Knobs supplied when a job is created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    pub target_resource_types: Vec<String>,
    pub max_concurrency: Option<u16>,
    pub query_delay_interval_ms: Option<u64>,
    pub target_data_store_usage_percentage: Option<u8>,
    pub maximum_number_of_resources_per_query: Option<u32>,
}

/// Persisted reindex state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReindexJobRecord {
    pub id: String,
    pub status: JobStatus,
    pub queued_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub canceled_time: Option<DateTime<Utc>>,
    /// Resource types requested by the caller. Empty means all.
    pub target_resource_types: Vec<String>,
    /// Search parameters being reindexed by this job.
    pub search_parameter_urls: BTreeSet<String>,
    /// Resource types actually touched by this job.
    pub resource_types: BTreeSet<String>,
    pub resource_counts: BTreeMap<String, ResourceTypeCount>,
    /// Current search-parameter hash per resource type.
    pub resource_type_search_parameter_hashes: BTreeMap<String, String>,
    /// Total resources needing reindex when the job started.
    pub count: u64,
    /// Resources processed so far. Only ever increases.
    pub progress: u64,
    pub issues: Vec<JobIssue>,
    pub consecutive_failure_count: u32,
    pub failure_count: u32,
    pub query_delay_interval_ms: u64,
    pub max_concurrency: u16,
    pub maximum_number_of_resources_per_query: u32,
    pub target_data_store_usage_percentage: Option<u8>,
    pub query_list: QueryStatusLedger,
}

impl ReindexJobRecord {
    /// Creates a fresh `Queued` record.
    pub fn new(
        id: impl Into<String>,
        target_resource_types: Vec<String>,
        max_concurrency: u16,
        query_delay_interval_ms: u64,
        maximum_number_of_resources_per_query: u32,
        target_data_store_usage_percentage: Option<u8>,
    ) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Queued,
            queued_time: Utc::now(),
            start_time: None,
            end_time: None,
            canceled_time: None,
            target_resource_types,
            search_parameter_urls: BTreeSet::new(),
            resource_types: BTreeSet::new(),
            resource_counts: BTreeMap::new(),
            resource_type_search_parameter_hashes: BTreeMap::new(),
            count: 0,
            progress: 0,
            issues: Vec::new(),
            consecutive_failure_count: 0,
            failure_count: 0,
            query_delay_interval_ms,
            max_concurrency: max_concurrency.max(1),
            maximum_number_of_resources_per_query: maximum_number_of_resources_per_query.max(1),
            target_data_store_usage_percentage,
            query_list: QueryStatusLedger::new(),
        }
    }

    /// Appends an issue, dropping the oldest once `max_issues` is reached.
    pub fn push_issue(&mut self, issue: JobIssue, max_issues: usize) {
        if self.issues.len() >= max_issues.max(1) {
            let overflow = self.issues.len() + 1 - max_issues.max(1);
            self.issues.drain(..overflow);
        }
        self.issues.push(issue);
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        if self.start_time.is_none() {
            self.start_time = Some(now);
        }
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.end_time = Some(now);
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>, issue: JobIssue, max_issues: usize) {
        self.status = JobStatus::Failed;
        self.end_time = Some(now);
        self.push_issue(issue, max_issues);
    }

    pub fn mark_canceled(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Canceled;
        self.end_time = Some(now);
        if self.canceled_time.is_none() {
            self.canceled_time = Some(now);
        }
    }
}
