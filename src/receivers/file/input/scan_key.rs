// SPDX-License-Identifier: Apache-2.0

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::receivers::file::source::LogSource;

/// Unique key of a tailer.
///
/// Derived from a resolved path and the consumer identifier of the source that
/// matched it: the path alone when the identifier is empty, otherwise
/// `<path>/<identifier>`. Equality, hashing and ordering only look at the
/// rendered key.
#[derive(Debug, Clone)]
pub struct ScanKey {
    value: String,
    path: PathBuf,
    identifier: String,
}

impl ScanKey {
    pub fn compute(path: &Path, source: &LogSource) -> Self {
        Self::from_parts(path, &source.identifier)
    }

    pub fn from_parts(path: &Path, identifier: &str) -> Self {
        let rendered = path.to_string_lossy();
        let value = if identifier.is_empty() {
            rendered.into_owned()
        } else {
            format!("{}/{}", rendered, identifier)
        };

        Self {
            value,
            path: path.to_path_buf(),
            identifier: identifier.to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Registry identifier of the tailed file, `file:<path>`.
    pub fn file_identifier(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

impl PartialEq for ScanKey {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for ScanKey {}

impl Hash for ScanKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl PartialOrd for ScanKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScanKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl Borrow<str> for ScanKey {
    fn borrow(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for ScanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}
