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

//! In-process implementations of the data access traits.
//!
//! These back the integration tests and the `reindexctl` binary. Each keeps
//! its state behind a `parking_lot::Mutex` and never holds the lock across
//! an await point.

mod fhir_store;
mod job_store;
mod queue;
mod search_parameters;
mod usage;

pub use fhir_store::{InMemoryFhirStore, InjectedFailure};
pub use job_store::InMemoryJobStore;
pub use queue::InMemoryQueue;
pub use search_parameters::InMemorySearchParameters;
pub use usage::StaticUsageSampler;
