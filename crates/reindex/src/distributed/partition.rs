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

use tracing::debug;

use crate::dal::{ReindexQuery, ReindexRange, SearchService};
use crate::error::StoreError;
use crate::models::ResourceTypeCount;

/// Splits a resource type's rows into ranges of at most `range_size` rows.
///
/// Surrogate-ordered engines partition the counted surrogate-id span.
/// Otherwise every row of the type is chunked by position, since a position
/// window over only the stale rows would shift as rows get reindexed.
pub async fn partition_resource_type(
    search: &dyn SearchService,
    resource_type: &str,
    count: &ResourceTypeCount,
    range_size: u32,
) -> Result<Vec<ReindexRange>, StoreError> {
    if count.count == 0 {
        return Ok(Vec::new());
    }
    let range_size = u64::from(range_size.max(1));

    if search.supports_surrogate_ordering() {
        if let (Some(start), Some(end)) = (count.start_surrogate_id, count.end_surrogate_id) {
            let ranges = search
                .get_surrogate_id_ranges(resource_type, start, end, range_size)
                .await?;
            debug!(resource_type, ranges = ranges.len(), "Partitioned by surrogate id");
            return Ok(ranges
                .into_iter()
                .map(|(start, end)| ReindexRange::SurrogateId { start, end })
                .collect());
        }
    }

    let total = search
        .search_for_reindex(&ReindexQuery::count_all(resource_type))
        .await?
        .total_count
        .unwrap_or(count.count)
        .max(count.count);
    let ranges: Vec<ReindexRange> = (0..total)
        .step_by(range_size as usize)
        .map(|skip| ReindexRange::Offset {
            skip,
            take: range_size,
        })
        .collect();
    debug!(resource_type, ranges = ranges.len(), "Partitioned by offset");
    Ok(ranges)
}
