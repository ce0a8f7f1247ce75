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

//! In-memory distributed job queue.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::dal::{JobCompletion, QueueClient};
use crate::error::StoreError;
use crate::models::{JobInfo, QueueJobStatus, QueueType};

#[derive(Default)]
struct QueueState {
    next_id: i64,
    jobs: BTreeMap<i64, JobInfo>,
}

/// Queue holding jobs in id order. Dequeue hands out the lowest created id.
#[derive(Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every job, in id order.
    pub fn jobs(&self) -> Vec<JobInfo> {
        self.state.lock().jobs.values().cloned().collect()
    }

    /// Flags a single job for cancellation, the way a customer cancel request
    /// reaches a running orchestrator.
    pub fn request_cancel(&self, job_id: i64) {
        if let Some(job) = self.state.lock().jobs.get_mut(&job_id) {
            job.cancel_requested = true;
        }
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn enqueue(
        &self,
        queue_type: QueueType,
        definitions: Vec<String>,
        group_id: Option<i64>,
    ) -> Result<Vec<JobInfo>, StoreError> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let mut created = Vec::with_capacity(definitions.len());
        let mut group = group_id;
        for definition in definitions {
            state.next_id += 1;
            let id = state.next_id;
            let group_id = *group.get_or_insert(id);
            let job = JobInfo {
                id,
                group_id,
                queue_type,
                status: QueueJobStatus::Created,
                definition,
                result: None,
                cancel_requested: false,
                attempt: 0,
                create_date: now,
                start_date: None,
                end_date: None,
                heartbeat_date: now,
                version: 1,
            };
            state.jobs.insert(id, job.clone());
            created.push(job);
        }
        Ok(created)
    }

    async fn dequeue(
        &self,
        queue_type: QueueType,
        heartbeat_timeout: Duration,
    ) -> Result<Option<JobInfo>, StoreError> {
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(heartbeat_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut state = self.state.lock();
        let candidate = state
            .jobs
            .values()
            .filter(|j| j.queue_type == queue_type && !j.cancel_requested)
            .find(|j| match j.status {
                QueueJobStatus::Created => true,
                QueueJobStatus::Running => now - j.heartbeat_date > timeout,
                _ => false,
            })
            .map(|j| j.id);

        Ok(candidate.and_then(|id| {
            state.jobs.get_mut(&id).map(|job| {
                job.status = QueueJobStatus::Running;
                job.start_date = Some(now);
                job.heartbeat_date = now;
                job.version += 1;
                job.clone()
            })
        }))
    }

    async fn get_job_by_id(
        &self,
        queue_type: QueueType,
        job_id: i64,
    ) -> Result<Option<JobInfo>, StoreError> {
        Ok(self
            .state
            .lock()
            .jobs
            .get(&job_id)
            .filter(|j| j.queue_type == queue_type)
            .cloned())
    }

    async fn get_jobs_by_group_id(
        &self,
        queue_type: QueueType,
        group_id: i64,
    ) -> Result<Vec<JobInfo>, StoreError> {
        Ok(self
            .state
            .lock()
            .jobs
            .values()
            .filter(|j| j.queue_type == queue_type && j.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn cancel_jobs_by_group_id(
        &self,
        queue_type: QueueType,
        group_id: i64,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut state = self.state.lock();
        for job in state
            .jobs
            .values_mut()
            .filter(|j| j.queue_type == queue_type && j.group_id == group_id)
        {
            job.cancel_requested = true;
            if job.status == QueueJobStatus::Created {
                job.status = QueueJobStatus::Cancelled;
                job.end_date = Some(now);
            }
        }
        Ok(())
    }

    async fn put_heartbeat(&self, job: &JobInfo) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let stored = state
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| StoreError::NotFound {
                job_id: job.id.to_string(),
            })?;
        stored.heartbeat_date = Utc::now();
        Ok(stored.cancel_requested)
    }

    async fn complete_job(
        &self,
        job: &JobInfo,
        completion: JobCompletion,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let stored = state
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| StoreError::NotFound {
                job_id: job.id.to_string(),
            })?;
        match completion {
            JobCompletion::Succeeded(result) => {
                stored.status = QueueJobStatus::Completed;
                stored.result = Some(result);
                stored.end_date = Some(now);
            }
            JobCompletion::Failed(result) => {
                stored.status = QueueJobStatus::Failed;
                stored.result = Some(result);
                stored.end_date = Some(now);
            }
            JobCompletion::Cancelled => {
                stored.status = QueueJobStatus::Cancelled;
                stored.end_date = Some(now);
            }
            JobCompletion::Rearm => {
                stored.status = QueueJobStatus::Created;
                stored.attempt += 1;
                stored.start_date = None;
            }
        }
        stored.version += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_group_takes_first_job_id() {
        let queue = InMemoryQueue::new();
        let jobs = queue
            .enqueue(QueueType::Reindex, vec!["a".into(), "b".into()], None)
            .await
            .unwrap();
        assert_eq!(jobs[0].group_id, jobs[0].id);
        assert_eq!(jobs[1].group_id, jobs[0].id);
    }

    #[tokio::test]
    async fn test_dequeue_claims_in_order_and_rearm_requeues() {
        let queue = InMemoryQueue::new();
        queue
            .enqueue(QueueType::Reindex, vec!["a".into(), "b".into()], None)
            .await
            .unwrap();
        let first = queue
            .dequeue(QueueType::Reindex, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.definition, "a");
        assert_eq!(first.status, QueueJobStatus::Running);

        queue.complete_job(&first, JobCompletion::Rearm).await.unwrap();
        let again = queue
            .dequeue(QueueType::Reindex, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.attempt, 1);
    }

    #[tokio::test]
    async fn test_cancel_group_flags_running_and_cancels_created() {
        let queue = InMemoryQueue::new();
        let jobs = queue
            .enqueue(QueueType::Reindex, vec!["a".into(), "b".into()], None)
            .await
            .unwrap();
        let running = queue
            .dequeue(QueueType::Reindex, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        queue
            .cancel_jobs_by_group_id(QueueType::Reindex, jobs[0].group_id)
            .await
            .unwrap();

        assert!(queue.put_heartbeat(&running).await.unwrap());
        let group = queue
            .get_jobs_by_group_id(QueueType::Reindex, jobs[0].group_id)
            .await
            .unwrap();
        assert_eq!(group[1].status, QueueJobStatus::Cancelled);
    }
}
