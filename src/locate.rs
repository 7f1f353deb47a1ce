//! Line-number to byte-offset mapping.
//!
//! Offsets are 0-based byte positions into the raw file content, so they can
//! be used for slicing and splicing without any re-encoding. Lines are
//! 1-based and separated by `\n`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    #[error("line {line} is out of range (content has {line_count} lines)")]
    LineOutOfRange { line: usize, line_count: usize },

    #[error("offset {offset} is past the end of content (length {len})")]
    OffsetOutOfRange { offset: usize, len: usize },
}

/// Number of lines in `content`: one more than the number of `\n` bytes.
pub fn line_count(content: &[u8]) -> usize {
    content.iter().filter(|&&b| b == b'\n').count() + 1
}

/// Byte offset of the first byte of `line`.
///
/// Line 1 always maps to offset 0. A line past the last terminator maps to
/// `content.len()` only when it is exactly the line after the final `\n`.
pub fn line_offset(content: &[u8], line: usize) -> Result<usize, LocateError> {
    if line == 0 {
        return Err(LocateError::LineOutOfRange {
            line,
            line_count: line_count(content),
        });
    }

    let mut current = 1;
    if current == line {
        return Ok(0);
    }

    for (idx, &byte) in content.iter().enumerate() {
        if byte == b'\n' {
            current += 1;
            if current == line {
                return Ok(idx + 1);
            }
        }
    }

    Err(LocateError::LineOutOfRange {
        line,
        line_count: current,
    })
}

/// 1-based line containing the byte at `offset`.
///
/// `offset == content.len()` is accepted and reports the last line.
pub fn line_of_offset(content: &[u8], offset: usize) -> Result<usize, LocateError> {
    if offset > content.len() {
        return Err(LocateError::OffsetOutOfRange {
            offset,
            len: content.len(),
        });
    }
    Ok(content[..offset].iter().filter(|&&b| b == b'\n').count() + 1)
}

/// Byte offset just past the `\n` that ends the line containing `offset`,
/// or `content.len()` when that line is the last one.
pub fn end_of_line(content: &[u8], offset: usize) -> usize {
    let offset = offset.min(content.len());
    match content[offset..].iter().position(|&b| b == b'\n') {
        Some(pos) => offset + pos + 1,
        None => content.len(),
    }
}
