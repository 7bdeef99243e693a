// SPDX-License-Identifier: Apache-2.0

//! File discovery, identity and line splitting.

mod file_id;
mod finder;
mod scan_key;
mod splitter;

pub use file_id::FileId;
pub use finder::{FileCandidate, resolve, same_identity};
pub use scan_key::ScanKey;
pub use splitter::{Line, LineSplitter};
