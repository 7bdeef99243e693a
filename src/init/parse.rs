// SPDX-License-Identifier: Apache-2.0

use crate::init::BoxError;

/// A `--source` value: a path or glob pattern with an optional consumer
/// identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceArg {
    pub identifier: String,
    pub pattern: String,
}

/// Parse `[ID=]PATTERN`.
///
/// The identifier may not contain path separators, so an `=` inside the
/// pattern itself is left alone.
pub fn parse_source(s: &str) -> Result<SourceArg, BoxError> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty source pattern".into());
    }

    let (identifier, pattern) = match s.split_once('=') {
        Some((id, pattern)) if !id.is_empty() && !id.contains(['/', '\\', '*']) => (id, pattern),
        _ => ("", s),
    };

    if pattern.is_empty() {
        return Err(format!("invalid ID=PATTERN: no pattern found in `{s}`").into());
    }

    Ok(SourceArg {
        identifier: identifier.to_string(),
        pattern: pattern.to_string(),
    })
}
