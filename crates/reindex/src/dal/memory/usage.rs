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

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::dal::DataStoreUsageSampler;

#[derive(Default)]
struct UsageState {
    current: Option<f64>,
    scripted: VecDeque<f64>,
}

/// Usage sampler whose readings are set by the caller.
///
/// Scripted readings are returned once each, in order; afterwards the last
/// value passed to [`StaticUsageSampler::set_usage`] is reported.
#[derive(Default)]
pub struct StaticUsageSampler {
    capacity: Option<f64>,
    state: Mutex<UsageState>,
}

impl StaticUsageSampler {
    pub fn new(capacity: Option<f64>) -> Self {
        Self {
            capacity,
            state: Mutex::new(UsageState::default()),
        }
    }

    pub fn set_usage(&self, usage: Option<f64>) {
        self.state.lock().current = usage;
    }

    pub fn script<I: IntoIterator<Item = f64>>(&self, readings: I) {
        self.state.lock().scripted.extend(readings);
    }
}

#[async_trait]
impl DataStoreUsageSampler for StaticUsageSampler {
    fn provisioned_capacity(&self) -> Option<f64> {
        self.capacity
    }

    async fn sample_usage(&self) -> Option<f64> {
        let mut state = self.state.lock();
        match state.scripted.pop_front() {
            Some(reading) => Some(reading),
            None => state.current,
        }
    }
}
