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

use chrono::Utc;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::SharedJobState;
use crate::context::ReindexContext;
use crate::dal::ReindexQuery;
use crate::error::{ReindexError, StoreError};
use crate::models::QueryKey;
use crate::throttle::ThrottleController;

/// Execution of one work-unit: a page query, index rewrite and ledger update.
pub(crate) struct WorkUnit {
    ctx: ReindexContext,
    state: SharedJobState,
    key: QueryKey,
    cancel: CancellationToken,
}

impl WorkUnit {
    pub fn new(
        ctx: ReindexContext,
        state: SharedJobState,
        key: QueryKey,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            state,
            key,
            cancel,
        }
    }

    /// Runs the unit. Ordinary failures are recorded on the ledger and
    /// swallowed; only cancellation and lost ownership are returned.
    pub async fn run(self) -> Result<(), ReindexError> {
        match self.process().await {
            Ok(()) => Ok(()),
            Err(ReindexError::Canceled) => Err(ReindexError::Canceled),
            Err(e @ ReindexError::Conflict { .. }) => Err(e),
            Err(e) => self.record_failure(e).await,
        }
    }

    async fn process(&self) -> Result<(), ReindexError> {
        let resource_type = self.key.resource_type.as_str();
        let (hash, batch_size) = {
            let s = self.state.lock().await;
            let hash = s
                .record
                .resource_type_search_parameter_hashes
                .get(resource_type)
                .cloned()
                .unwrap_or_else(|| self.ctx.definitions.search_parameter_hash(resource_type));
            let batch = s
                .throttle
                .get_throttle_batch_size(s.record.maximum_number_of_resources_per_query);
            (hash, batch)
        };

        let query = ReindexQuery::page(
            resource_type,
            hash,
            self.key.continuation_token.clone(),
            batch_size,
        );
        let page = self
            .cancellable(self.ctx.search.search_for_reindex(&query))
            .await?;

        let hashes = {
            let mut s = self.state.lock().await;
            let now = Utc::now();
            if let Some(token) = &page.continuation_token {
                if s.record.query_list.spawn_child(&self.key, token.clone(), now) {
                    debug!(unit = %self.key, token = %token, "Queued continuation work-unit");
                }
            }
            s.record.query_list.touch(&self.key, now);
            s.throttle.update_datastore_usage().await;
            s.persist(self.ctx.job_store.as_ref()).await?;
            s.record.resource_type_search_parameter_hashes.clone()
        };

        let outcome = self
            .cancellable(self.ctx.reindexer().reindex(page.resources, &hashes))
            .await?;

        let mut s = self.state.lock().await;
        if s.record.query_list.mark_completed(&self.key, Utc::now()) {
            s.record.progress += outcome.processed() as u64;
            metrics::counter!("reindex_work_units_completed_total").increment(1);
        }
        s.record.consecutive_failure_count = 0;
        s.throttle.update_datastore_usage().await;
        s.persist(self.ctx.job_store.as_ref()).await?;
        debug!(
            job_id = %s.record.id,
            unit = %self.key,
            rewritten = outcome.rewritten,
            skipped = outcome.skipped,
            progress = s.record.progress,
            "Work-unit completed"
        );
        Ok(())
    }

    async fn record_failure(&self, err: ReindexError) -> Result<(), ReindexError> {
        let threshold = self.ctx.config.consecutive_failures_threshold();
        let message = err.to_string();
        let mut s = self.state.lock().await;
        let now = Utc::now();

        let unit_failures = s.record.query_list.record_failure(&self.key, &message, now);
        s.record.failure_count += 1;
        s.record.consecutive_failure_count += 1;
        metrics::counter!("reindex_work_units_failed_total").increment(1);

        if unit_failures >= threshold || s.record.consecutive_failure_count >= threshold {
            error!(
                job_id = %s.record.id,
                unit = %self.key,
                unit_failures,
                job_failures = s.record.consecutive_failure_count,
                "Work-unit failed past threshold: {}",
                message
            );
            s.record.query_list.mark_failed(&self.key, now);
            s.fatal_failure = Some(format!(
                "Query for {} failed {} times: {}",
                self.key.resource_type, unit_failures, message
            ));
        } else {
            warn!(
                job_id = %s.record.id,
                unit = %self.key,
                unit_failures,
                "Work-unit failed, requeueing: {}",
                message
            );
            s.record.query_list.requeue(&self.key, now);
        }
        s.persist(self.ctx.job_store.as_ref()).await
    }

    async fn cancellable<T, F>(&self, fut: F) -> Result<T, ReindexError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ReindexError::Canceled),
            result = fut => result.map_err(ReindexError::from),
        }
    }
}
