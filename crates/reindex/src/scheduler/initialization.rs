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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Default)]
struct SignalState {
    initialized: AtomicBool,
    notify: Notify,
}

/// Set-once gate raised when search parameter metadata has been loaded.
///
/// Clones share the same gate. Waiters park on a [`Notify`] instead of
/// polling the flag.
#[derive(Clone, Default)]
pub struct InitializationSignal {
    state: Arc<SignalState>,
}

impl InitializationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the gate. Later calls have no effect.
    pub fn set(&self) {
        if !self.state.initialized.swap(true, Ordering::SeqCst) {
            debug!("Search parameters initialized");
            self.state.notify.notify_waiters();
        }
    }

    pub fn is_set(&self) -> bool {
        self.state.initialized.load(Ordering::SeqCst)
    }

    /// Returns once the gate is raised.
    pub async fn wait(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}
