// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

use crate::init::parse::{SourceArg, parse_source};
use crate::receivers::file::config::ScannerConfig;
use crate::receivers::file::source::{LogSource, StartAt};

/// Where to start reading newly discovered files
#[derive(Copy, Clone, Debug, ValueEnum, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartAtArg {
    /// Start at the beginning of the file
    Beginning,
    /// Start at the end of the file (tail mode)
    End,
}

impl From<StartAtArg> for StartAt {
    fn from(s: StartAtArg) -> Self {
        match s {
            StartAtArg::Beginning => StartAt::Beginning,
            StartAtArg::End => StartAt::End,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct ScanRun {
    /// Log source as [ID=]PATTERN, where PATTERN is a file path or glob and ID an
    /// optional consumer identifier. May be repeated.
    #[arg(long = "source", env = "LOGSCAN_SOURCES", value_delimiter = ',', value_parser = parse_source, required = true)]
    pub sources: Vec<SourceArg>,

    /// Comma-separated glob patterns for files to exclude
    #[arg(long, env = "LOGSCAN_EXCLUDE", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Where to start reading files without a checkpoint. When unset, files present
    /// at startup are read from the end and files that appear later from the beginning.
    #[arg(value_enum, long, env = "LOGSCAN_START_AT")]
    pub start_at: Option<StartAtArg>,

    /// Path of the JSON offset registry. Offsets are kept in memory when unset.
    #[arg(long, env = "LOGSCAN_OFFSETS_PATH")]
    pub offsets_path: Option<PathBuf>,

    /// Maximum number of files tailed at the same time
    #[arg(long, env = "LOGSCAN_OPEN_FILES_LIMIT", default_value = "500")]
    pub open_files_limit: usize,

    /// How often to rescan sources and poll idle files, in milliseconds
    #[arg(long, env = "LOGSCAN_POLL_INTERVAL_MS", default_value = "100")]
    pub poll_interval_ms: u64,

    /// Minimum time between two checkpoints of the same file, in milliseconds
    #[arg(long, env = "LOGSCAN_CHECKPOINT_INTERVAL_MS", default_value = "1000")]
    pub checkpoint_interval_ms: u64,

    /// Size of a single file read, in bytes
    #[arg(long, env = "LOGSCAN_READ_BUFFER_SIZE", default_value = "65536")]
    pub read_buffer_size: usize,

    /// Maximum line size in bytes; longer lines are split
    #[arg(long, env = "LOGSCAN_MAX_LINE_SIZE", default_value = "262144")]
    pub max_line_size: usize,

    /// Maximum time to wait for one tailer to stop, in milliseconds
    #[arg(long, env = "LOGSCAN_STOP_TIMEOUT_MS", default_value = "2000")]
    pub stop_timeout_ms: u64,

    /// Number of pipeline channels lines are spread over
    #[arg(long, env = "LOGSCAN_PIPELINES", default_value = "1")]
    pub pipelines: usize,

    /// Capacity of each pipeline channel, in lines
    #[arg(long, env = "LOGSCAN_PIPELINE_QUEUE_SIZE", default_value = "1000")]
    pub pipeline_queue_size: usize,
}

impl ScanRun {
    /// Build the scanner config from command line args
    pub fn build_config(&self) -> ScannerConfig {
        ScannerConfig {
            open_files_limit: self.open_files_limit,
            poll_interval_ms: self.poll_interval_ms,
            checkpoint_interval_ms: self.checkpoint_interval_ms,
            read_buffer_size: self.read_buffer_size,
            max_line_size: self.max_line_size,
            stop_timeout_ms: self.stop_timeout_ms,
        }
    }

    /// One source per `--source` value, named after its pattern and identifier.
    pub fn build_sources(&self) -> Vec<LogSource> {
        self.sources
            .iter()
            .map(|arg| {
                let name = if arg.identifier.is_empty() {
                    arg.pattern.clone()
                } else {
                    format!("{}/{}", arg.pattern, arg.identifier)
                };

                let mut source = LogSource::new(name, arg.pattern.clone())
                    .with_identifier(arg.identifier.clone())
                    .with_exclude(self.exclude.clone());
                if let Some(start_at) = self.start_at {
                    source = source.with_start_at(start_at.into());
                }
                source
            })
            .collect()
    }
}
