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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One extracted search value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SearchIndexEntry {
    pub parameter_url: String,
    pub value: String,
}

/// A stored resource as seen by the reindex engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceWrapper {
    pub resource_type: String,
    pub resource_id: String,
    /// Time-ordered internal identifier used for range partitioning.
    pub surrogate_id: i64,
    pub version: u64,
    pub last_modified: DateTime<Utc>,
    pub raw: serde_json::Value,
    /// Hash of the search parameters the stored indices were computed with.
    pub search_parameter_hash: Option<String>,
    pub search_indices: Vec<SearchIndexEntry>,
}
