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

//! Queue-based reindexing: an orchestrator job fans out processing jobs, one
//! per resource-type range, and coordinates status transitions once they end.
//! Jobs share no memory; they communicate only through queue payloads.

pub mod definitions;
pub mod host;
pub mod orchestrator;
pub mod partition;
pub mod polling;
pub mod processing;

pub use definitions::{
    peek_type_id, ReindexOrchestratorJobDefinition, ReindexOrchestratorJobResult,
    ReindexProcessingJobDefinition, ReindexProcessingJobResult, ORCHESTRATOR_TYPE_ID,
    PROCESSING_TYPE_ID,
};
pub use host::JobHost;
pub use orchestrator::{enqueue_orchestrator, ReindexOrchestratorJob};
pub use partition::partition_resource_type;
pub use polling::AdaptivePoller;
pub use processing::ReindexProcessingJob;
