// SPDX-License-Identifier: Apache-2.0

use bytes::{Bytes, BytesMut};

/// One complete line cut from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Line content without its terminator
    pub content: Bytes,
    /// Byte position the line begins at
    pub offset: u64,
    /// Byte position right after the line and its terminator
    pub end: u64,
}

/// Incremental newline splitter.
///
/// Bytes without a terminator are held back until the rest of the line
/// arrives, unless they exceed `max_line_size`, in which case the line is cut
/// into `max_line_size` pieces. `\n` and `\r\n` terminators are stripped and
/// empty lines are dropped.
#[derive(Debug)]
pub struct LineSplitter {
    pending: BytesMut,
    pending_start: u64,
    max_line_size: usize,
}

impl LineSplitter {
    pub fn new(start_offset: u64, max_line_size: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            pending_start: start_offset,
            max_line_size: max_line_size.max(1),
        }
    }

    /// Position right after the last byte that was cut into a line, including
    /// dropped empty lines.
    pub fn committed(&self) -> u64 {
        self.pending_start
    }

    /// Number of bytes held back waiting for a terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feed the next bytes of the file and take every line they complete.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Line> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        loop {
            let window = self.pending.len().min(self.max_line_size + 1);
            let cut = match self.pending[..window].iter().position(|b| *b == b'\n') {
                Some(pos) => Some((pos + 1, pos)),
                None if self.pending.len() > self.max_line_size => {
                    Some((self.max_line_size, self.max_line_size))
                }
                None => None,
            };

            let Some((consumed, content_len)) = cut else {
                break;
            };

            let offset = self.pending_start;
            let mut content = self.pending.split_to(consumed).freeze();
            self.pending_start += consumed as u64;

            content.truncate(content_len);
            if consumed > content_len && content.last() == Some(&b'\r') {
                content.truncate(content.len() - 1);
            }

            if !content.is_empty() {
                lines.push(Line {
                    content,
                    offset,
                    end: self.pending_start,
                });
            }
        }

        lines
    }
}
