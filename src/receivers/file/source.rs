// SPDX-License-Identifier: Apache-2.0

//! Log sources: the already validated inputs the scanner reconciles against.

use serde::Deserialize;

/// Where to start reading from when a file is first discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAt {
    /// Start reading from the beginning of the file
    Beginning,
    /// Start reading from the end of the file (only new content)
    End,
}

/// A configured log source.
///
/// A source names a file path or glob pattern and optionally a consumer
/// identifier (for example a container ID). Two sources with the same pattern
/// but different identifiers tail the same files independently.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogSource {
    /// Unique name of the source, used for status reporting
    pub name: String,

    /// File path or glob pattern
    pub path: String,

    /// Glob patterns for files to exclude
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Where to start reading newly discovered files. When unset, files found
    /// while registering the source start at the end and files discovered by a
    /// later scan start at the beginning.
    #[serde(default)]
    pub start_at: Option<StartAt>,

    /// Consumer identifier distinguishing several consumers of one file
    #[serde(default)]
    pub identifier: String,
}

impl LogSource {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            exclude: Vec::new(),
            start_at: None,
            identifier: String::new(),
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn with_start_at(mut self, start_at: StartAt) -> Self {
        self.start_at = Some(start_at);
        self
    }

    pub fn with_exclude(mut self, exclude: Vec<String>) -> Self {
        self.exclude = exclude;
        self
    }

    /// Start position for files matched when the source is first registered.
    pub fn launch_start_at(&self) -> StartAt {
        self.start_at.unwrap_or(StartAt::End)
    }

    /// Start position for files that appear after the source was registered.
    pub fn discovery_start_at(&self) -> StartAt {
        self.start_at.unwrap_or(StartAt::Beginning)
    }
}
