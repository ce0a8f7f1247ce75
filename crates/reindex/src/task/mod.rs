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

//! # Single-Node Task Engine
//!
//! [`ReindexJobTask`] executes one reindex job record end to end:
//!
//! 1. A fresh record (empty work-unit ledger) is initialized: parameters that
//!    need reindexing are selected, resources are counted per type, and one
//!    `Queued` work-unit is seeded per type with a positive count.
//! 2. The main loop dispatches work-units with bounded concurrency, requeues
//!    stale ones, sleeps for the configured interval plus the throttle delay,
//!    and re-reads the job to observe external cancellation.
//! 3. Finalization verifies nothing is left to reindex, advances search
//!    parameter statuses and records the terminal status.
//!
//! All reads and writes of the shared record happen under one async mutex,
//! and every write goes through [`JobState::persist`] with the version tag
//! from the previous write.

mod engine;
mod finalize;
mod work_unit;

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::dal::JobStore;
use crate::error::{ReindexError, StoreError};
use crate::models::{JobStatus, ReindexJobRecord, VersionTag};
use crate::throttle::DefaultThrottleController;

pub use engine::ReindexJobTask;

/// The record being executed and everything guarded with it.
pub(crate) struct JobState {
    pub record: ReindexJobRecord,
    pub version: VersionTag,
    pub throttle: DefaultThrottleController,
    /// Set when a work-unit crossed the failure threshold.
    pub fatal_failure: Option<String>,
}

pub(crate) type SharedJobState = Arc<Mutex<JobState>>;

impl JobState {
    /// Writes the record under its current version tag.
    ///
    /// On a conflict the stored record is re-read: if it was canceled the
    /// cancellation is adopted and [`ReindexError::Canceled`] returned,
    /// otherwise another writer owns the job and the conflict is surfaced.
    pub async fn persist(&mut self, store: &dyn JobStore) -> Result<(), ReindexError> {
        match store.update_job(&self.record, &self.version).await {
            Ok(saved) => {
                self.version = saved.version;
                Ok(())
            }
            Err(StoreError::Conflict { job_id }) => {
                let latest = store.get_job_by_id(&job_id).await?;
                if latest.record.status == JobStatus::Canceled {
                    self.adopt(latest.record, latest.version);
                    Err(ReindexError::Canceled)
                } else {
                    Err(ReindexError::Conflict { job_id })
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn adopt(&mut self, record: ReindexJobRecord, version: VersionTag) {
        self.record = record;
        self.version = version;
    }
}
