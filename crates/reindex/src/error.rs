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

//! Error types for the reindex engine.
//!
//! Errors are split by concern:
//!
//! - [`StoreError`] is raised by the external collaborators (job store,
//!   queue, search service, resource store).
//! - [`ReindexError`] is the engine-level taxonomy surfaced to callers of the
//!   handlers, the task engine and the scheduler.
//! - [`JobExecutionError`] is returned by queue-dispatched jobs and tells the
//!   job host whether to re-arm, fail or cancel the queue entry.

use thiserror::Error;

/// Errors raised by storage-side collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The supplied version tag no longer matches the stored record.
    #[error("Version conflict while updating job {job_id}")]
    Conflict { job_id: String },

    /// No record exists for the given identifier.
    #[error("Job {job_id} was not found")]
    NotFound { job_id: String },

    /// The datastore rejected the request because it is overloaded or offline.
    #[error("Datastore unavailable: {0}")]
    Unavailable(String),

    /// A query exceeded its execution timeout.
    #[error("Query timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the error is a query timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout(_))
    }
}

/// Engine-level errors.
#[derive(Debug, Error)]
pub enum ReindexError {
    /// Stale version tag. Retried with backoff before surfacing.
    #[error("Job {job_id} was modified concurrently")]
    Conflict { job_id: String },

    #[error("Job {job_id} was not found")]
    NotFound { job_id: String },

    /// Query timeout or datastore overload.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Caller- or customer-initiated cancellation.
    #[error("Reindex operation was canceled")]
    Canceled,

    /// Programming or contract violation; never retried.
    #[error("Contract violation: {0}")]
    Contract(String),

    #[error("Request validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("A reindex job is already active: {job_id}")]
    ActiveJobExists { job_id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReindexError {
    /// Conflicts and transient infrastructure failures may be retried;
    /// everything else is surfaced immediately.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ReindexError::Conflict { .. } | ReindexError::Transient(_)
        )
    }
}

impl From<StoreError> for ReindexError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { job_id } => ReindexError::Conflict { job_id },
            StoreError::NotFound { job_id } => ReindexError::NotFound { job_id },
            StoreError::Unavailable(msg) | StoreError::Timeout(msg) => {
                ReindexError::Transient(msg)
            }
            StoreError::Serialization(e) => ReindexError::Serialization(e),
        }
    }
}

/// Outcome of a failed queue-dispatched job.
#[derive(Debug, Error)]
pub enum JobExecutionError {
    /// The job should be re-armed for another attempt.
    #[error("Retriable job failure: {0}")]
    Retriable(String),

    /// The job is failed outright.
    #[error("Job failed: {0}")]
    Failed(String),

    #[error("Job was canceled")]
    Canceled,

    /// Unparsable definition or unknown job type.
    #[error("Job contract violation: {0}")]
    Contract(String),
}

impl From<ReindexError> for JobExecutionError {
    fn from(err: ReindexError) -> Self {
        match err {
            ReindexError::Canceled => JobExecutionError::Canceled,
            ReindexError::Contract(msg) => JobExecutionError::Contract(msg),
            ReindexError::Serialization(e) => JobExecutionError::Contract(e.to_string()),
            other if other.is_retriable() => JobExecutionError::Retriable(other.to_string()),
            other => JobExecutionError::Failed(other.to_string()),
        }
    }
}
