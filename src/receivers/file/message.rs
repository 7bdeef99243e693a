// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::receivers::file::input::ScanKey;

/// Where a message was read from. Shared by every message of one tailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOrigin {
    pub scan_key: ScanKey,
    pub identifier: String,
    pub path: PathBuf,
    pub source: String,
}

impl MessageOrigin {
    pub fn new(scan_key: ScanKey, source: impl Into<String>) -> Self {
        Self {
            identifier: scan_key.identifier().to_string(),
            path: scan_key.path().to_path_buf(),
            scan_key,
            source: source.into(),
        }
    }
}

/// One log line.
#[derive(Debug, Clone)]
pub struct Message {
    /// Line content, terminator stripped
    pub content: Bytes,
    /// Time the line was read
    pub timestamp_unix_nano: u64,
    /// Byte position the line begins at
    pub offset: u64,
    pub origin: Arc<MessageOrigin>,
}

impl Message {
    pub fn new(content: Bytes, offset: u64, origin: Arc<MessageOrigin>) -> Self {
        Self {
            content,
            timestamp_unix_nano: now_unix_nano(),
            offset,
            origin,
        }
    }

    /// Content as text, replacing invalid UTF-8.
    pub fn content_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

fn now_unix_nano() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
