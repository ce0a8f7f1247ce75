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

//! Entries of the generic distributed job queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Queue partitions. Reindex orchestrator and processing jobs share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueType {
    Reindex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueJobStatus {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl QueueJobStatus {
    /// Created or running.
    pub fn is_active(&self) -> bool {
        matches!(self, QueueJobStatus::Created | QueueJobStatus::Running)
    }
}

impl fmt::Display for QueueJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueueJobStatus::Created => "Created",
            QueueJobStatus::Running => "Running",
            QueueJobStatus::Completed => "Completed",
            QueueJobStatus::Failed => "Failed",
            QueueJobStatus::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// A queued job. `definition` and `result` are opaque serialized payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: i64,
    pub group_id: i64,
    pub queue_type: QueueType,
    pub status: QueueJobStatus,
    pub definition: String,
    pub result: Option<String>,
    pub cancel_requested: bool,
    /// Number of times the job has been re-armed after a retriable failure.
    pub attempt: u32,
    pub create_date: DateTime<Utc>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub heartbeat_date: DateTime<Utc>,
    pub version: i64,
}
