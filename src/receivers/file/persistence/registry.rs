// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::input::{FileId, ScanKey};

/// Resume position of one scan key.
///
/// The file identity is stored with the offset so a checkpoint taken before a
/// rotation is never applied to the file that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub offset: u64,
    pub file_id: FileId,
}

/// Offset registry shared by all tailers.
///
/// Implementations must tolerate concurrent calls for different keys.
pub trait Registry: Send + Sync {
    /// Last checkpoint recorded for the key
    fn get_offset(&self, key: &ScanKey) -> Option<Checkpoint>;

    /// Record a checkpoint for the key
    fn set_offset(&self, key: &ScanKey, checkpoint: Checkpoint);

    /// Consumer identifier of the most recently checkpointed key
    fn config_id(&self) -> String;

    /// `file:<path>` of the most recently checkpointed key
    fn identifier(&self) -> String;

    /// Persist pending checkpoints
    fn flush(&self) -> Result<()>;
}

#[derive(Debug, Default)]
pub(crate) struct RegistryState {
    pub(crate) checkpoints: HashMap<ScanKey, Checkpoint>,
    pub(crate) last_active: Option<ScanKey>,
    pub(crate) dirty: bool,
}

/// Registry kept in memory only.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: RwLock<RegistryState>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_state(state: RegistryState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    /// Snapshot of every checkpoint, sorted by key.
    pub fn checkpoints(&self) -> Vec<(ScanKey, Checkpoint)> {
        let mut all: Vec<_> = match self.state.read() {
            Ok(state) => state
                .checkpoints
                .iter()
                .map(|(k, c)| (k.clone(), *c))
                .collect(),
            Err(_) => Vec::new(),
        };
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Run `f` on the state if it changed since the last call.
    pub(crate) fn take_dirty<T>(&self, f: impl FnOnce(&RegistryState) -> T) -> Result<Option<T>> {
        let mut state = self
            .state
            .write()
            .map_err(|e| Error::Persistence(e.to_string()))?;

        if !state.dirty {
            return Ok(None);
        }
        let out = f(&state);
        state.dirty = false;
        Ok(Some(out))
    }

    pub(crate) fn mark_dirty(&self) {
        match self.state.write() {
            Ok(mut state) => state.dirty = true,
            Err(_) => warn!("Offset registry lock poisoned, pending checkpoints may not be flushed"),
        }
    }
}

impl Registry for MemoryRegistry {
    fn get_offset(&self, key: &ScanKey) -> Option<Checkpoint> {
        self.state.read().ok()?.checkpoints.get(key).copied()
    }

    fn set_offset(&self, key: &ScanKey, checkpoint: Checkpoint) {
        match self.state.write() {
            Ok(mut state) => {
                state.checkpoints.insert(key.clone(), checkpoint);
                state.last_active = Some(key.clone());
                state.dirty = true;
            }
            Err(_) => warn!(
                scan_key = %key,
                offset = checkpoint.offset,
                "Offset registry lock poisoned, checkpoint dropped"
            ),
        }
    }

    fn config_id(&self) -> String {
        self.state
            .read()
            .ok()
            .and_then(|s| s.last_active.as_ref().map(|k| k.identifier().to_string()))
            .unwrap_or_default()
    }

    fn identifier(&self) -> String {
        self.state
            .read()
            .ok()
            .and_then(|s| s.last_active.as_ref().map(|k| k.file_identifier()))
            .unwrap_or_default()
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
