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

//! Bounded retry for optimistic-concurrency conflicts.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::ReindexError;

/// Runs `op`, retrying only [`ReindexError::Conflict`] up to `attempts`
/// additional times. The wait before retry `n` is `base_delay * 2^n` plus up
/// to 50% random jitter.
pub async fn retry_on_conflict<T, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, ReindexError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ReindexError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Err(ReindexError::Conflict { job_id }) if attempt < attempts => {
                let delay = backoff_delay(base_delay, attempt);
                debug!(job_id = %job_id, attempt, ?delay, "Version conflict, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << attempt.min(16));
    let jitter_ms = exp.as_millis() as u64 / 2;
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_ms)
    };
    exp + Duration::from_millis(jitter)
}
