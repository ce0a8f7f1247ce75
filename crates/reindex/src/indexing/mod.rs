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

//! Search index extraction, hashing and rewriting.

pub mod hash;
pub mod indexer;
pub mod reindexer;

pub use hash::{index_hash, search_parameter_hash};
pub use indexer::{JsonSearchIndexer, SearchIndexer};
pub use reindexer::{ReindexOutcome, ResourceReindexer};
