// SPDX-License-Identifier: Apache-2.0

//! On-disk schema of the offset registry.
//!
//! Entries are keyed by scan key and keep the path, consumer identifier and
//! file identity next to the offset so the file stays readable by humans.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Current schema version for persisted state
pub const PERSISTED_STATE_VERSION: u8 = 1;

/// Minimal view used to check the version before parsing the rest
#[derive(Debug, Deserialize)]
pub struct PersistedVersion {
    pub version: u8,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedStateV1 {
    /// Schema version (always 1 for this format)
    pub version: u8,
    /// Map from scan key to checkpoint
    pub checkpoints: HashMap<String, PersistedCheckpointV1>,
}

impl Default for PersistedStateV1 {
    fn default() -> Self {
        Self {
            version: PERSISTED_STATE_VERSION,
            checkpoints: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCheckpointV1 {
    /// Path of the tailed file
    pub path: String,
    /// Consumer identifier, empty when the source has none
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub identifier: String,
    /// Device ID (Unix) or volume serial (Windows)
    pub dev: u64,
    /// Inode number (Unix) or file index (Windows)
    pub ino: u64,
    /// Byte position reading resumes from
    pub offset: u64,
}
