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

use sha2::{Digest, Sha256};

use crate::models::{SearchIndexEntry, SearchParameterInfo};

/// Hash of a resource type's indexed parameter set. Order-independent.
pub fn search_parameter_hash(parameters: &[SearchParameterInfo]) -> String {
    let mut urls: Vec<&str> = parameters.iter().map(|p| p.url.as_str()).collect();
    urls.sort_unstable();
    urls.dedup();
    let mut hasher = Sha256::new();
    for url in urls {
        hasher.update(url.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Hash of extracted index entries. Order-independent.
pub fn index_hash(entries: &[SearchIndexEntry]) -> String {
    let mut sorted: Vec<&SearchIndexEntry> = entries.iter().collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    for entry in sorted {
        hasher.update(entry.parameter_url.as_bytes());
        hasher.update([0u8]);
        hasher.update(entry.value.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
