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

//! Data models shared by both execution paths.

pub mod job_record;
pub mod query_status;
pub mod queue_job;
pub mod resource;
pub mod search_parameter;

pub use job_record::{
    IssueSeverity, JobIssue, JobParameters, JobRecordWrapper, JobStatus, ReindexJobRecord,
    ResourceTypeCount, VersionTag,
};
pub use query_status::{
    QueryKey, QueryState, QueryStatusLedger, ReindexJobQueryStatus, MAX_COMPLETED_QUERIES,
};
pub use queue_job::{JobInfo, QueueJobStatus, QueueType};
pub use resource::{ResourceWrapper, SearchIndexEntry};
pub use search_parameter::{
    ResourceSearchParameterStatus, SearchParameterInfo, SearchParameterStatus,
};
