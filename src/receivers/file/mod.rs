// SPDX-License-Identifier: Apache-2.0

//! File log receiver: discovers log files and tails them.
//!
//! Sources name paths or glob patterns. The [`Scanner`] periodically resolves
//! them into files, keeps exactly one [`Tailer`] per [`ScanKey`], and replaces
//! tailers whose file was rotated or truncated. Lines are forwarded to bounded
//! pipeline channels and read offsets are checkpointed to a [`Registry`].
//!
//! Features:
//! - Device/inode file identity, stable across renames
//! - Several consumers of one file through per-source identifiers
//! - Hard limit on the number of open files
//! - Offset persistence for resume after restarts

pub mod config;
pub mod error;
pub mod input;
pub mod message;
pub mod persistence;
pub mod pipeline;
pub mod reconcile;
pub mod scanner;
pub mod source;
pub mod status;
pub mod tailer;

pub use config::ScannerConfig;
pub use error::{Error, Result};
pub use input::{FileCandidate, FileId, ScanKey, resolve, same_identity};
pub use message::{Message, MessageOrigin};
pub use persistence::{Checkpoint, JsonFileRegistry, MemoryRegistry, Registry};
pub use pipeline::{ChannelProvider, PipelineProvider};
pub use reconcile::{Plan, StopReason, reconcile};
pub use scanner::{Scanner, ScannerHandle};
pub use source::{LogSource, StartAt};
pub use status::{SourceStatus, SourceStatuses};
pub use tailer::{StartPosition, Tailer, TailerId, TailerOptions};
