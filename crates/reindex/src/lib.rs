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

//! # Reindex
//!
//! Rebuilds the search index of a clinical resource repository after its
//! search parameter definitions change, without taking the repository
//! offline.
//!
//! Two execution paths share the same models and collaborators:
//!
//! - **Polling scheduler** ([`scheduler::ReindexJobWorker`]): one job record
//!   tracks every work-unit. A claimed job is driven by [`task::ReindexJobTask`],
//!   which persists its progress after every step so any instance can resume
//!   it once the heartbeat goes stale.
//! - **Distributed queue** ([`distributed`]): an orchestrator job partitions
//!   every resource type into ranges, enqueues one processing job per range
//!   and advances search parameter statuses once their types are done.
//!
//! In both paths a resource is rewritten only when its stored
//! search-parameter hash differs from the current one, so reprocessing after a
//! crash is idempotent.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use reindex::{ReindexConfig, ReindexContext};
//! use reindex::handlers::CreateReindexHandler;
//! use reindex::scheduler::{InitializationSignal, ReindexJobWorker};
//!
//! let ctx = ReindexContext::new(
//!     ReindexConfig::default(),
//!     job_store, search, resource_store, definitions, status_manager,
//! );
//! let signal = InitializationSignal::default();
//! let worker = ReindexJobWorker::new(ctx.clone(), signal.clone());
//! tokio::spawn(async move { worker.run().await });
//! signal.set();
//!
//! let job = CreateReindexHandler::new(ctx).handle(Default::default()).await?;
//! ```
//!
//! Collaborators are traits in [`dal`]; [`dal::memory`] provides in-process
//! implementations used by the tests and the command-line driver.

pub mod config;
pub mod context;
pub mod dal;
pub mod discovery;
pub mod distributed;
pub mod error;
pub mod handlers;
pub mod indexing;
pub mod models;
pub mod resource_types;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod task;
pub mod throttle;

pub use config::{ReindexConfig, ReindexConfigBuilder};
pub use context::ReindexContext;
pub use error::{JobExecutionError, ReindexError, StoreError};
pub use models::{
    JobParameters, JobRecordWrapper, JobStatus, ReindexJobRecord, SearchParameterStatus,
    VersionTag,
};
pub use resource_types::ResourceTypeCatalog;
pub use scheduler::{InitializationSignal, ReindexJobWorker};
pub use task::ReindexJobTask;
pub use throttle::{DefaultThrottleController, ThrottleController};
