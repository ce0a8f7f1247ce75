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
use tracing::{info, warn};

use super::JobState;
use crate::context::ReindexContext;
use crate::dal::ReindexQuery;
use crate::error::ReindexError;
use crate::models::{JobIssue, QueryState};
use crate::status::advance_parameters;

pub(crate) const RESUBMIT_HINT: &str = "resubmit the job to finish indexing remaining resources";

/// Records the terminal status once the main loop has exited.
pub(crate) async fn finalize(ctx: &ReindexContext, s: &mut JobState) -> Result<(), ReindexError> {
    let max_issues = ctx.config.max_issues();
    let failed_units = s.record.query_list.count(QueryState::Failed);

    if let Some(reason) = s.fatal_failure.clone() {
        s.record
            .mark_failed(Utc::now(), JobIssue::error(format!("{reason}; {RESUBMIT_HINT}")), max_issues);
    } else if failed_units > 0 {
        s.record.mark_failed(
            Utc::now(),
            JobIssue::error(format!("{failed_units} queries failed; {RESUBMIT_HINT}")),
            max_issues,
        );
    } else if s.record.query_list.all_completed() {
        let remaining = remaining_counts(ctx, s).await?;
        if remaining.is_empty() {
            complete_and_advance(ctx, s).await?;
        } else {
            let detail = remaining
                .iter()
                .map(|(resource_type, count)| format!("{count} {resource_type}"))
                .collect::<Vec<_>>()
                .join(", ");
            warn!(job_id = %s.record.id, remaining = %detail, "Resources still need reindexing");
            s.record.mark_failed(
                Utc::now(),
                JobIssue::error(format!(
                    "Reindex finished but resources still need reindexing ({detail}); {RESUBMIT_HINT}"
                )),
                max_issues,
            );
        }
    }

    s.persist(ctx.job_store.as_ref()).await
}

/// Marks the job completed after advancing every parameter whose resource
/// types were all reindexed.
pub(crate) async fn complete_and_advance(
    ctx: &ReindexContext,
    s: &mut JobState,
) -> Result<(), ReindexError> {
    let advanced = advance_parameters(
        ctx.status_manager.as_ref(),
        ctx.definitions.as_ref(),
        &ctx.catalog,
        &s.record.search_parameter_urls,
        &s.record.resource_types,
    )
    .await?;
    info!(
        job_id = %s.record.id,
        advanced = advanced.len(),
        "Completing reindex job"
    );
    s.record.mark_completed(Utc::now());
    Ok(())
}

/// A final count-only query per reindexed type.
async fn remaining_counts(
    ctx: &ReindexContext,
    s: &JobState,
) -> Result<Vec<(String, u64)>, ReindexError> {
    let mut remaining = Vec::new();
    for resource_type in &s.record.resource_types {
        let hash = ctx.definitions.search_parameter_hash(resource_type);
        let result = ctx
            .search
            .search_for_reindex(&ReindexQuery::count(resource_type.as_str(), hash))
            .await?;
        let count = result.total_count.unwrap_or(0);
        if count > 0 {
            remaining.push((resource_type.clone(), count));
        }
    }
    Ok(remaining)
}
