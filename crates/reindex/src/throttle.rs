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

//! # Throttle Controller
//!
//! Turns observed datastore utilization into a back-off for the reindex
//! engine. After every datastore-touching step the engine calls
//! [`ThrottleController::update_datastore_usage`], which folds a fresh sample
//! into a moving average. The engine then asks for:
//!
//! - a delay ([`ThrottleController::get_throttle_based_delay`]) that grows with
//!   how far the average exceeds the target and decays toward zero once usage
//!   is back in range
//! - a page size ([`ThrottleController::get_throttle_batch_size`]) shrunk in
//!   proportion to the overshoot
//!
//! Throttling is active only when the job sets a positive target utilization
//! and the sampler reports readings. With a provisioned capacity the target is
//! that share of the capacity; otherwise samples are percentages and the target
//! is capped at [`UNPROVISIONED_TARGET_CAP`] percent.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::dal::DataStoreUsageSampler;
use crate::models::ReindexJobRecord;

/// Upper bound on the percentage target when capacity is unknown.
pub const UNPROVISIONED_TARGET_CAP: f64 = 60.0;

/// Delay added per 100% overshoot of the target.
const DELAY_PER_OVERSHOOT_MS: f64 = 2_000.0;
/// Delay applied on the first cycle over target.
const BASE_DELAY_MS: f64 = 100.0;
const MAX_DELAY_MS: f64 = 10_000.0;
/// Delays below this collapse to zero while decaying.
const MIN_DELAY_MS: u64 = 10;
const MIN_BATCH_SIZE: u32 = 10;

#[async_trait]
pub trait ThrottleController: Send + Sync {
    /// Seeds the target utilization for `job`.
    fn initialize(&mut self, job: &ReindexJobRecord, provisioned_capacity: Option<f64>);

    /// Samples current utilization and returns the updated moving average.
    async fn update_datastore_usage(&mut self) -> Option<f64>;

    fn get_throttle_based_delay(&self) -> Duration;

    fn get_throttle_batch_size(&self, configured: u32) -> u32;
}

/// Moving-average controller over a [`DataStoreUsageSampler`].
pub struct DefaultThrottleController {
    sampler: Arc<dyn DataStoreUsageSampler>,
    window: usize,
    samples: VecDeque<f64>,
    target: Option<f64>,
    delay_ms: u64,
}

impl DefaultThrottleController {
    pub fn new(sampler: Arc<dyn DataStoreUsageSampler>, window: usize) -> Self {
        Self {
            sampler,
            window: window.max(1),
            samples: VecDeque::new(),
            target: None,
            delay_ms: 0,
        }
    }

    pub fn target(&self) -> Option<f64> {
        self.target
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Relative overshoot of the average above target, zero when in range.
    fn overshoot(&self) -> f64 {
        match (self.target, self.average()) {
            (Some(target), Some(avg)) if target > 0.0 && avg > target => (avg - target) / target,
            _ => 0.0,
        }
    }

    fn recompute_delay(&mut self) {
        let overshoot = self.overshoot();
        self.delay_ms = if overshoot > 0.0 {
            (BASE_DELAY_MS + overshoot * DELAY_PER_OVERSHOOT_MS).min(MAX_DELAY_MS) as u64
        } else {
            let decayed = self.delay_ms / 2;
            if decayed < MIN_DELAY_MS {
                0
            } else {
                decayed
            }
        };
    }
}

#[async_trait]
impl ThrottleController for DefaultThrottleController {
    fn initialize(&mut self, job: &ReindexJobRecord, provisioned_capacity: Option<f64>) {
        self.samples.clear();
        self.delay_ms = 0;
        self.target = match job.target_data_store_usage_percentage {
            Some(pct) if pct > 0 => {
                let pct = f64::from(pct.min(100));
                Some(match provisioned_capacity {
                    Some(capacity) if capacity > 0.0 => capacity * pct / 100.0,
                    _ => pct.min(UNPROVISIONED_TARGET_CAP),
                })
            }
            _ => None,
        };
        debug!(job_id = %job.id, target = ?self.target, "Initialized throttle controller");
    }

    async fn update_datastore_usage(&mut self) -> Option<f64> {
        self.target?;
        let sample = self.sampler.sample_usage().await?;
        self.samples.push_back(sample);
        while self.samples.len() > self.window {
            self.samples.pop_front();
        }
        self.recompute_delay();
        metrics::gauge!("reindex_throttle_delay_ms").set(self.delay_ms as f64);
        self.average()
    }

    fn get_throttle_based_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    fn get_throttle_batch_size(&self, configured: u32) -> u32 {
        let configured = configured.max(1);
        let (Some(target), Some(avg)) = (self.target, self.average()) else {
            return configured;
        };
        if avg <= target || avg <= 0.0 {
            return configured;
        }
        let scaled = (f64::from(configured) * target / avg).floor() as u32;
        scaled.max(MIN_BATCH_SIZE.min(configured))
    }
}
