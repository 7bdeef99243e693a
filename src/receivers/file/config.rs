// SPDX-License-Identifier: Apache-2.0

//! Configuration for the file scanner.

use serde::Deserialize;
use std::time::Duration;

use crate::receivers::file::error::{Error, Result};

/// Configuration for the file scanner and its tailers
#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    /// Maximum number of files tailed at the same time
    #[serde(default = "default_open_files_limit")]
    pub open_files_limit: usize,

    /// How often to rescan sources and poll idle files (in milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Minimum time between two checkpoints of the same tailer (in milliseconds)
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,

    /// Size of a single read from a tailed file (in bytes)
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Maximum size of a single line (in bytes). Longer lines are split.
    #[serde(default = "default_max_line_size")]
    pub max_line_size: usize,

    /// Maximum time to wait for one tailer to stop (in milliseconds)
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

fn default_open_files_limit() -> usize {
    500
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_checkpoint_interval_ms() -> u64 {
    1000
}

fn default_read_buffer_size() -> usize {
    64 * 1024
}

fn default_max_line_size() -> usize {
    256 * 1024
}

fn default_stop_timeout_ms() -> u64 {
    2000
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            open_files_limit: default_open_files_limit(),
            poll_interval_ms: default_poll_interval_ms(),
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
            read_buffer_size: default_read_buffer_size(),
            max_line_size: default_max_line_size(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl ScannerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.open_files_limit == 0 {
            return Err(Error::Config("open_files_limit must be positive".to_string()));
        }

        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".to_string()));
        }

        if self.read_buffer_size == 0 {
            return Err(Error::Config("read_buffer_size must be positive".to_string()));
        }

        if self.max_line_size == 0 {
            return Err(Error::Config("max_line_size must be positive".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ScannerConfig::default();
        assert_eq!(config.open_files_limit, 500);
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.max_line_size, 256 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_partial_deserialize() {
        let config: ScannerConfig =
            serde_json::from_str(r#"{"open_files_limit": 2, "poll_interval_ms": 20}"#).unwrap();
        assert_eq!(config.open_files_limit, 2);
        assert_eq!(config.poll_interval_ms, 20);
        assert_eq!(config.checkpoint_interval_ms, 1000);
    }

    #[test]
    fn test_config_validation() {
        let mut config = ScannerConfig::default();
        config.open_files_limit = 0;
        assert!(config.validate().is_err());

        let mut config = ScannerConfig::default();
        config.max_line_size = 0;
        assert!(config.validate().is_err());
    }
}
