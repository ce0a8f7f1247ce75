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

use std::collections::BTreeMap;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::definitions::{
    ReindexProcessingJobDefinition, ReindexProcessingJobResult, PROCESSING_TYPE_ID,
};
use crate::context::ReindexContext;
use crate::dal::ReindexQuery;
use crate::error::{JobExecutionError, StoreError};
use crate::models::JobInfo;

/// Reindexes one resource-type range assigned by the orchestrator.
///
/// Stateless: everything it needs is in the job definition. A query timeout
/// re-arms the job until `processing_timeout_retries` attempts have been made;
/// any other failure fails the job.
pub struct ReindexProcessingJob {
    ctx: ReindexContext,
}

impl ReindexProcessingJob {
    pub fn new(ctx: ReindexContext) -> Self {
        Self { ctx }
    }

    pub async fn execute(
        &self,
        job_info: &JobInfo,
        cancel: CancellationToken,
    ) -> Result<String, JobExecutionError> {
        let definition: ReindexProcessingJobDefinition =
            serde_json::from_str(&job_info.definition).map_err(|e| {
                JobExecutionError::Contract(format!(
                    "job {} has an unreadable processing definition: {e}",
                    job_info.id
                ))
            })?;
        if definition.type_id != PROCESSING_TYPE_ID {
            return Err(JobExecutionError::Contract(format!(
                "job {} has type {} but was dispatched as a processing job",
                job_info.id, definition.type_id
            )));
        }

        match self.process(&definition, &cancel).await {
            Ok(result) => {
                info!(
                    job_id = job_info.id,
                    resource_type = %definition.resource_type,
                    succeeded = result.succeeded_resource_count,
                    "Processing job completed"
                );
                Ok(serde_json::to_string(&result)
                    .map_err(|e| JobExecutionError::Failed(e.to_string()))?)
            }
            Err(ProcessingError::Canceled) => Err(JobExecutionError::Canceled),
            Err(ProcessingError::Store(e)) if e.is_timeout() => {
                let retries = self.ctx.config.processing_timeout_retries();
                if job_info.attempt < retries {
                    warn!(
                        job_id = job_info.id,
                        attempt = job_info.attempt,
                        "Processing query timed out, re-arming: {}",
                        e
                    );
                    Err(JobExecutionError::Retriable(e.to_string()))
                } else {
                    Err(JobExecutionError::Failed(format!(
                        "query timed out after {} attempts: {e}",
                        job_info.attempt + 1
                    )))
                }
            }
            Err(ProcessingError::Store(e)) => Err(JobExecutionError::Failed(e.to_string())),
        }
    }

    async fn process(
        &self,
        definition: &ReindexProcessingJobDefinition,
        cancel: &CancellationToken,
    ) -> Result<ReindexProcessingJobResult, ProcessingError> {
        let resource_type = definition.resource_type.as_str();
        let hash = definition.search_parameter_hash.clone();
        let hashes = BTreeMap::from([(definition.resource_type.clone(), hash.clone())]);
        let reindexer = self.ctx.reindexer();

        let counted = cancellable(
            cancel,
            self.ctx.search.search_for_reindex(
                &ReindexQuery::count(resource_type, hash.as_str()).with_range(definition.range),
            ),
        )
        .await?;
        let expected = counted.total_count.unwrap_or(0);
        debug!(resource_type, range = ?definition.range, expected, "Processing range");

        let mut result = ReindexProcessingJobResult {
            search_parameter_urls: definition.search_parameter_urls.clone(),
            ..Default::default()
        };
        if expected == 0 {
            return Ok(result);
        }

        let mut continuation = None;
        loop {
            let query = ReindexQuery::page(
                resource_type,
                hash.as_str(),
                continuation.take(),
                definition.maximum_number_of_resources_per_query,
            )
            .with_range(definition.range);
            let page = cancellable(cancel, self.ctx.search.search_for_reindex(&query)).await?;
            let fetched = page.resources.len() as u64;
            if fetched == 0 {
                break;
            }

            let outcome = cancellable(cancel, reindexer.reindex(page.resources, &hashes)).await?;
            let processed = outcome.processed() as u64;
            result.succeeded_resource_count += processed;
            result.failed_resource_count += fetched.saturating_sub(processed);

            match page.continuation_token {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        metrics::counter!("reindex_processing_resources_total")
            .increment(result.succeeded_resource_count);
        Ok(result)
    }
}

enum ProcessingError {
    Canceled,
    Store(StoreError),
}

impl From<StoreError> for ProcessingError {
    fn from(e: StoreError) -> Self {
        ProcessingError::Store(e)
    }
}

async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, ProcessingError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProcessingError::Canceled),
        result = fut => result.map_err(ProcessingError::Store),
    }
}
