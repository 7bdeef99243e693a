// SPDX-License-Identifier: Apache-2.0

//! Offset registry: where each scan key resumes after a restart.

mod json_file;
mod registry;
mod schema;

pub use json_file::JsonFileRegistry;
pub use registry::{Checkpoint, MemoryRegistry, Registry};
pub use schema::{PERSISTED_STATE_VERSION, PersistedCheckpointV1, PersistedStateV1};
