// SPDX-License-Identifier: Apache-2.0

//! Command line wiring for the `logscan` binary.

pub mod agent;
pub mod args;
pub mod parse;
pub mod wait;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
