// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use tracing::warn;

/// Status of one source as of the last reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStatus {
    pub live_tailers: usize,
    pub last_error: Option<String>,
}

impl SourceStatus {
    pub fn is_tailing(&self) -> bool {
        self.live_tailers > 0
    }
}

/// Per-source status, cheap to clone and readable from any task.
#[derive(Debug, Clone, Default)]
pub struct SourceStatuses {
    inner: Arc<RwLock<BTreeMap<String, SourceStatus>>>,
}

impl SourceStatuses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: &str) -> Option<SourceStatus> {
        self.inner.read().ok()?.get(source).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, SourceStatus> {
        self.inner.read().map(|m| m.clone()).unwrap_or_default()
    }

    pub(crate) fn set_live_tailers(&self, source: &str, live_tailers: usize) {
        if let Some(mut map) = self.write(source) {
            map.entry(source.to_string()).or_default().live_tailers = live_tailers;
        }
    }

    pub(crate) fn set_error(&self, source: &str, error: Option<String>) {
        if let Some(mut map) = self.write(source) {
            map.entry(source.to_string()).or_default().last_error = error;
        }
    }

    pub(crate) fn remove(&self, source: &str) {
        if let Some(mut map) = self.write(source) {
            map.remove(source);
        }
    }

    fn write(&self, source: &str) -> Option<RwLockWriteGuard<'_, BTreeMap<String, SourceStatus>>> {
        match self.inner.write() {
            Ok(map) => Some(map),
            Err(_) => {
                warn!(source, "Source status lock poisoned, status not updated");
                None
            }
        }
    }
}
