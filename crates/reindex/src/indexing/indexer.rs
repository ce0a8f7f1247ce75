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

//! Search value extraction.

use serde_json::Value;

use crate::models::{ResourceWrapper, SearchIndexEntry, SearchParameterInfo};

/// Extracts search index entries from a resource.
pub trait SearchIndexer: Send + Sync {
    fn extract(
        &self,
        resource: &ResourceWrapper,
        parameters: &[SearchParameterInfo],
    ) -> Vec<SearchIndexEntry>;
}

/// Indexes the top-level body element named by each parameter's code.
/// Arrays produce one entry per element; objects are indexed by their
/// compact JSON form.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSearchIndexer;

impl JsonSearchIndexer {
    fn push_values(url: &str, value: &Value, out: &mut Vec<SearchIndexEntry>) {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    Self::push_values(url, item, out);
                }
            }
            Value::String(s) => out.push(SearchIndexEntry {
                parameter_url: url.to_string(),
                value: s.clone(),
            }),
            other => out.push(SearchIndexEntry {
                parameter_url: url.to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl SearchIndexer for JsonSearchIndexer {
    fn extract(
        &self,
        resource: &ResourceWrapper,
        parameters: &[SearchParameterInfo],
    ) -> Vec<SearchIndexEntry> {
        let mut entries = Vec::new();
        for parameter in parameters {
            if let Some(value) = resource.raw.get(&parameter.code) {
                Self::push_values(&parameter.url, value, &mut entries);
            }
        }
        entries
    }
}
