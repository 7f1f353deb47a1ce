//! Output blocks: the delimited region holding a cell's last rendered result.
//!
//! On disk a block is the prefix marker line, the rendered text, a newline,
//! and the suffix marker line. Detection is plain byte comparison against the
//! marker strings; nothing inside a block is escaped.

use std::ops::Range;
use thiserror::Error;

/// Width of the default marker lines, excluding the `\n`.
pub const MARKER_WIDTH: usize = 50;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("output block opened at byte {offset} has no closing marker")]
    Unterminated { offset: usize },
}

/// The fixed prefix and suffix marker lines, each including its `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    prefix: String,
    suffix: String,
}

impl Default for Markers {
    fn default() -> Self {
        let bar = "=".repeat(MARKER_WIDTH - 1);
        Self::new(format!("#{bar}"), format!("{bar}#"))
    }
}

impl Markers {
    /// Build markers from two marker lines. A missing trailing `\n` is added.
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        let terminate = |mut line: String| {
            if !line.ends_with('\n') {
                line.push('\n');
            }
            line
        };
        Self {
            prefix: terminate(prefix.into()),
            suffix: terminate(suffix.into()),
        }
    }

    /// 50-column markers that form a C-style block comment.
    pub fn block_comment() -> Self {
        let bar = "=".repeat(MARKER_WIDTH - 2);
        Self::new(format!("/*{bar}"), format!("{bar}*/"))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Suffix marker text without its line terminator.
    fn suffix_text(&self) -> &str {
        self.suffix.strip_suffix('\n').unwrap_or(&self.suffix)
    }

    /// Whether `rendered` would end a block early if written between markers.
    pub fn collides(&self, rendered: &str) -> bool {
        rendered.contains(self.suffix_text())
    }

    /// The full block text for `rendered`.
    pub fn render_block(&self, rendered: &str) -> String {
        let mut block =
            String::with_capacity(self.prefix.len() + rendered.len() + 1 + self.suffix.len());
        block.push_str(&self.prefix);
        block.push_str(rendered);
        block.push('\n');
        block.push_str(&self.suffix);
        block
    }

    /// Offset just past the output block starting at `offset`, or `offset`
    /// itself when no block starts there.
    ///
    /// A suffix marker that lost only its trailing `\n` at end of file still
    /// closes the block.
    pub fn find_block_end(&self, content: &[u8], offset: usize) -> Result<usize, BlockError> {
        let offset = offset.min(content.len());
        let rest = &content[offset..];
        if !rest.starts_with(self.prefix.as_bytes()) {
            return Ok(offset);
        }

        let body_start = offset + self.prefix.len();
        let suffix = self.suffix.as_bytes();
        let mut idx = body_start;
        while idx < content.len() {
            if content[idx..].starts_with(suffix) {
                return Ok(idx + suffix.len());
            }
            idx += 1;
        }

        let bare = self.suffix_text().as_bytes();
        if content[body_start..].ends_with(bare) {
            return Ok(content.len());
        }

        Err(BlockError::Unterminated { offset })
    }

    /// Start of a prefix marker that closes the line beginning at
    /// `line_start` after some code on it.
    ///
    /// This is where a block lands when the cell's file had no final newline.
    pub fn trailing_prefix(&self, content: &[u8], line_start: usize) -> Option<usize> {
        let eol = line_start + content.get(line_start..)?.iter().position(|&b| b == b'\n')?;
        let start = (eol + 1).checked_sub(self.prefix.len())?;
        (start > line_start && content[start..=eol] == *self.prefix.as_bytes()).then_some(start)
    }

    /// Spans of every output block in `content`, in order.
    ///
    /// A block opens either at the start of a line or at a prefix marker that
    /// ends a line of code. Marker text anywhere else is ordinary content.
    pub fn block_spans(&self, content: &[u8]) -> Result<Vec<Range<usize>>, BlockError> {
        let mut spans = Vec::new();
        let mut line_start = 0;

        while line_start < content.len() {
            let at_line = self.find_block_end(content, line_start)?;
            let span = if at_line > line_start {
                Some(line_start..at_line)
            } else {
                match self.trailing_prefix(content, line_start) {
                    Some(start) => Some(start..self.find_block_end(content, start)?),
                    None => None,
                }
            };

            line_start = match span {
                Some(span) => {
                    let end = span.end;
                    spans.push(span);
                    end
                }
                None => content[line_start..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(content.len(), |pos| line_start + pos + 1),
            };
        }

        Ok(spans)
    }

    /// `content` with every output block blanked to spaces, keeping line
    /// breaks and byte offsets intact.
    pub fn mask_blocks(&self, content: &str) -> Result<String, BlockError> {
        let bytes = content.as_bytes();
        let mut masked = String::with_capacity(content.len());
        let mut copied_to = 0;

        for span in self.block_spans(bytes)? {
            masked.push_str(&content[copied_to..span.start]);
            masked.extend(
                bytes[span.clone()]
                    .iter()
                    .map(|&b| if b == b'\n' { '\n' } else { ' ' }),
            );
            copied_to = span.end;
        }

        masked.push_str(&content[copied_to..]);
        Ok(masked)
    }

    /// Remove every output block from `content`, returning the new content and
    /// the number of blocks removed.
    pub fn strip_blocks(&self, content: &str) -> Result<(String, usize), BlockError> {
        let spans = self.block_spans(content.as_bytes())?;
        let mut out = String::with_capacity(content.len());
        let mut copied_to = 0;

        for span in &spans {
            out.push_str(&content[copied_to..span.start]);
            copied_to = span.end;
        }

        out.push_str(&content[copied_to..]);
        Ok((out, spans.len()))
    }
}
