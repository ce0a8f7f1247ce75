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

use std::time::Duration;

/// Poll interval that halves toward `floor` while observations change and
/// doubles toward `ceiling` after `stable_cycles` unchanged observations.
#[derive(Debug, Clone)]
pub struct AdaptivePoller {
    floor: Duration,
    ceiling: Duration,
    stable_cycles: u32,
    current: Duration,
    unchanged: u32,
}

impl AdaptivePoller {
    pub fn new(floor: Duration, ceiling: Duration, stable_cycles: u32) -> Self {
        Self {
            floor,
            ceiling: ceiling.max(floor),
            stable_cycles: stable_cycles.max(1),
            current: floor,
            unchanged: 0,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Records one observation and returns the next interval.
    pub fn next_delay(&mut self, changed: bool) -> Duration {
        if changed {
            self.unchanged = 0;
            self.current = (self.current / 2).max(self.floor);
        } else {
            self.unchanged += 1;
            if self.unchanged >= self.stable_cycles {
                self.unchanged = 0;
                self.current = self.current.saturating_mul(2).min(self.ceiling);
            }
        }
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grows_after_stable_cycles_and_caps() {
        let mut p = AdaptivePoller::new(Duration::from_secs(1), Duration::from_secs(5), 2);
        assert_eq!(p.next_delay(false), Duration::from_secs(1));
        assert_eq!(p.next_delay(false), Duration::from_secs(2));
        p.next_delay(false);
        assert_eq!(p.next_delay(false), Duration::from_secs(4));
        p.next_delay(false);
        assert_eq!(p.next_delay(false), Duration::from_secs(5));
    }

    #[test]
    fn test_shrinks_on_change() {
        let mut p = AdaptivePoller::new(Duration::from_secs(1), Duration::from_secs(8), 1);
        p.next_delay(false);
        p.next_delay(false);
        assert_eq!(p.current(), Duration::from_secs(4));
        assert_eq!(p.next_delay(true), Duration::from_secs(2));
        assert_eq!(p.next_delay(true), Duration::from_secs(1));
        assert_eq!(p.next_delay(true), Duration::from_secs(1));
    }
}
