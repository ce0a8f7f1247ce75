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

//! Search parameter metadata and lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a search parameter, owned by the status manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchParameterStatus {
    Supported,
    PendingDelete,
    PendingDisable,
    Enabled,
    Disabled,
    Deleted,
}

impl SearchParameterStatus {
    /// Parameters in these states have data that is not yet indexed
    /// consistently with their definition.
    pub fn requires_reindex(&self) -> bool {
        matches!(
            self,
            SearchParameterStatus::Supported
                | SearchParameterStatus::PendingDelete
                | SearchParameterStatus::PendingDisable
        )
    }

    /// The state a parameter moves to once every resource it applies to has
    /// been reindexed. `None` means no transition applies.
    pub fn after_reindex(&self) -> Option<SearchParameterStatus> {
        match self {
            SearchParameterStatus::PendingDelete => Some(SearchParameterStatus::Deleted),
            SearchParameterStatus::PendingDisable => Some(SearchParameterStatus::Disabled),
            SearchParameterStatus::Supported | SearchParameterStatus::Enabled => {
                Some(SearchParameterStatus::Enabled)
            }
            SearchParameterStatus::Disabled | SearchParameterStatus::Deleted => None,
        }
    }
}

impl fmt::Display for SearchParameterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchParameterStatus::Supported => "Supported",
            SearchParameterStatus::PendingDelete => "PendingDelete",
            SearchParameterStatus::PendingDisable => "PendingDisable",
            SearchParameterStatus::Enabled => "Enabled",
            SearchParameterStatus::Disabled => "Disabled",
            SearchParameterStatus::Deleted => "Deleted",
        };
        f.write_str(s)
    }
}

/// Definition of a search parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParameterInfo {
    pub url: String,
    /// The name used in queries and in resource bodies, e.g. `birthdate`.
    pub code: String,
    /// Resource types the parameter is declared on. May include the abstract
    /// `Resource` and `DomainResource` bases.
    pub base_resource_types: Vec<String>,
    pub is_searchable: bool,
    pub is_supported: bool,
}

impl SearchParameterInfo {
    pub fn new(url: impl Into<String>, code: impl Into<String>, base: &[&str]) -> Self {
        Self {
            url: url.into(),
            code: code.into(),
            base_resource_types: base.iter().map(|s| s.to_string()).collect(),
            is_searchable: false,
            is_supported: true,
        }
    }
}

/// Current status entry held by the status manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSearchParameterStatus {
    pub url: String,
    pub status: SearchParameterStatus,
    pub last_updated: DateTime<Utc>,
}
