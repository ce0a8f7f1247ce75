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

//! In-memory job record store with per-record version tags.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::dal::JobStore;
use crate::error::StoreError;
use crate::models::{JobRecordWrapper, JobStatus, ReindexJobRecord, VersionTag};

struct StoredJob {
    record: ReindexJobRecord,
    version: u64,
    heartbeat: DateTime<Utc>,
}

impl StoredJob {
    fn wrapper(&self) -> JobRecordWrapper {
        JobRecordWrapper {
            record: self.record.clone(),
            version: VersionTag::new(self.version.to_string()),
        }
    }
}

/// Job store keeping records in a process-local map.
///
/// Each write bumps the record's version; a write carrying any other version
/// is rejected with [`StoreError::Conflict`]. All operations take the same
/// lock, so check-and-write is atomic.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<String, StoredJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the heartbeat of a record.
    pub fn set_heartbeat(&self, job_id: &str, heartbeat: DateTime<Utc>) {
        if let Some(stored) = self.jobs.lock().get_mut(job_id) {
            stored.heartbeat = heartbeat;
        }
    }

    pub fn heartbeat(&self, job_id: &str) -> Option<DateTime<Utc>> {
        self.jobs.lock().get(job_id).map(|s| s.heartbeat)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, record: ReindexJobRecord) -> Result<JobRecordWrapper, StoreError> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&record.id) {
            return Err(StoreError::Conflict { job_id: record.id });
        }
        let stored = StoredJob {
            record,
            version: 1,
            heartbeat: Utc::now(),
        };
        let wrapper = stored.wrapper();
        jobs.insert(wrapper.record.id.clone(), stored);
        Ok(wrapper)
    }

    async fn get_job_by_id(&self, job_id: &str) -> Result<JobRecordWrapper, StoreError> {
        self.jobs
            .lock()
            .get(job_id)
            .map(StoredJob::wrapper)
            .ok_or_else(|| StoreError::NotFound {
                job_id: job_id.to_string(),
            })
    }

    async fn update_job(
        &self,
        record: &ReindexJobRecord,
        version: &VersionTag,
    ) -> Result<JobRecordWrapper, StoreError> {
        let mut jobs = self.jobs.lock();
        let stored = jobs.get_mut(&record.id).ok_or_else(|| StoreError::NotFound {
            job_id: record.id.clone(),
        })?;
        if stored.version.to_string() != version.as_str() {
            debug!(
                job_id = %record.id,
                expected = %version,
                actual = stored.version,
                "Rejecting job update with stale version"
            );
            return Err(StoreError::Conflict {
                job_id: record.id.clone(),
            });
        }
        stored.record = record.clone();
        stored.version += 1;
        stored.heartbeat = Utc::now();
        Ok(stored.wrapper())
    }

    async fn acquire_jobs(
        &self,
        max_count: usize,
        stale_threshold: Duration,
    ) -> Result<Vec<JobRecordWrapper>, StoreError> {
        let now = Utc::now();
        let stale = chrono::Duration::from_std(stale_threshold)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut jobs = self.jobs.lock();

        let mut candidates: Vec<(DateTime<Utc>, String)> = jobs
            .values()
            .filter(|s| match s.record.status {
                JobStatus::Queued => true,
                JobStatus::Running => now - s.heartbeat > stale,
                _ => false,
            })
            .map(|s| (s.record.queued_time, s.record.id.clone()))
            .collect();
        candidates.sort();

        let mut acquired = Vec::new();
        for (_, id) in candidates.into_iter().take(max_count) {
            if let Some(stored) = jobs.get_mut(&id) {
                stored.record.mark_running(now);
                stored.version += 1;
                stored.heartbeat = now;
                acquired.push(stored.wrapper());
            }
        }
        Ok(acquired)
    }

    async fn check_active_jobs_exist(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .jobs
            .lock()
            .values()
            .find(|s| matches!(s.record.status, JobStatus::Queued | JobStatus::Running))
            .map(|s| s.record.id.clone()))
    }
}
