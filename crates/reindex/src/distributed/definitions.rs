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

//! Payloads exchanged through the job queue.
//!
//! Definitions and results travel as JSON strings. Every payload carries a
//! `typeId` so a host can dispatch without knowing the full shape.

use serde::{Deserialize, Serialize};

use crate::dal::ReindexRange;

pub const ORCHESTRATOR_TYPE_ID: u32 = 1;
pub const PROCESSING_TYPE_ID: u32 = 2;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeIdPeek {
    type_id: u32,
}

/// Reads only the `typeId` of a serialized definition.
pub fn peek_type_id(definition: &str) -> Option<u32> {
    serde_json::from_str::<TypeIdPeek>(definition)
        .ok()
        .map(|p| p.type_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexOrchestratorJobDefinition {
    pub type_id: u32,
    /// Empty means all resource types.
    #[serde(default)]
    pub target_resource_types: Vec<String>,
    pub maximum_number_of_resources_per_query: u32,
}

impl ReindexOrchestratorJobDefinition {
    pub fn new(target_resource_types: Vec<String>, maximum_number_of_resources_per_query: u32) -> Self {
        Self {
            type_id: ORCHESTRATOR_TYPE_ID,
            target_resource_types,
            maximum_number_of_resources_per_query: maximum_number_of_resources_per_query.max(1),
        }
    }
}

/// One resource type and one slice of its rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexProcessingJobDefinition {
    pub type_id: u32,
    pub group_id: i64,
    pub resource_type: String,
    pub range: ReindexRange,
    pub search_parameter_hash: String,
    pub search_parameter_urls: Vec<String>,
    pub maximum_number_of_resources_per_query: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexProcessingJobResult {
    pub succeeded_resource_count: u64,
    pub failed_resource_count: u64,
    pub search_parameter_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexOrchestratorJobResult {
    pub created_jobs: usize,
    pub succeeded_resources: u64,
    pub failed_resources: u64,
    pub failed_jobs: usize,
    pub advanced_search_parameter_urls: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
