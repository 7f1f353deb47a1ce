//! Finding where a cell's own source text ends.
//!
//! A [`BoundaryFinder`] knows how to measure one syntactic unit. The
//! bookkeeping around it (range checks, validating what the finder returns,
//! and extending the end through the rest of the final line) lives in
//! [`find_end`], so every finder gets the same offset contract.

pub mod scanner;

pub use scanner::BracketScanner;

use crate::locate;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoundaryError {
    #[error("cannot parse a complete unit at byte {offset}: {reason}")]
    UnparsableRegion { offset: usize, reason: String },

    #[error("start offset {offset} is not usable in content of length {len}")]
    InvalidStart { offset: usize, len: usize },
}

impl BoundaryError {
    pub fn unparsable(offset: usize, reason: impl Into<String>) -> Self {
        BoundaryError::UnparsableRegion {
            offset,
            reason: reason.into(),
        }
    }
}

/// Measures one complete syntactic unit.
pub trait BoundaryFinder: Send + Sync {
    /// Return the offset just past the unit beginning at the first
    /// non-whitespace byte at or after `start`.
    fn unit_end(&self, content: &str, start: usize) -> Result<usize, BoundaryError>;
}

/// Offset just past the unit starting at `start`, including the remainder of
/// the unit's last line and its `\n` terminator when there is one.
pub fn find_end(
    finder: &dyn BoundaryFinder,
    content: &str,
    start: usize,
) -> Result<usize, BoundaryError> {
    if start > content.len() || !content.is_char_boundary(start) {
        return Err(BoundaryError::InvalidStart {
            offset: start,
            len: content.len(),
        });
    }

    if content[start..].trim().is_empty() {
        return Err(BoundaryError::unparsable(start, "no code at this location"));
    }

    let raw_end = finder.unit_end(content, start)?;
    if raw_end < start || raw_end > content.len() {
        return Err(BoundaryError::unparsable(
            start,
            format!("parser reported end {raw_end} outside [{start}, {}]", content.len()),
        ));
    }

    // A unit that already ends on a line terminator is complete.
    if raw_end > start && content.as_bytes()[raw_end - 1] == b'\n' {
        return Ok(raw_end);
    }
    Ok(locate::end_of_line(content.as_bytes(), raw_end))
}

/// First non-whitespace byte at or after `start`.
pub(crate) fn skip_whitespace(content: &str, start: usize) -> usize {
    content[start..]
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map(|(idx, _)| start + idx)
        .unwrap_or(content.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(usize);

    impl BoundaryFinder for Fixed {
        fn unit_end(&self, _content: &str, _start: usize) -> Result<usize, BoundaryError> {
            Ok(self.0)
        }
    }

    #[test]
    fn extends_through_end_of_line() {
        let content = "x = 1  # trailing\ny = 2\n";
        assert_eq!(find_end(&Fixed(5), content, 0), Ok(18));
    }

    #[test]
    fn no_trailing_newline_ends_at_eof() {
        assert_eq!(find_end(&Fixed(5), "x = 1", 0), Ok(5));
    }

    #[test]
    fn unit_ending_on_newline_is_kept() {
        assert_eq!(find_end(&Fixed(6), "x = 1\ny\n", 0), Ok(6));
    }

    #[test]
    fn rejects_bogus_finder_result() {
        let err = find_end(&Fixed(100), "x = 1\n", 0).unwrap_err();
        assert!(matches!(err, BoundaryError::UnparsableRegion { .. }));
    }

    #[test]
    fn rejects_start_past_end() {
        let err = find_end(&Fixed(0), "x", 5).unwrap_err();
        assert_eq!(err, BoundaryError::InvalidStart { offset: 5, len: 1 });
    }

    #[test]
    fn empty_region_is_unparsable() {
        let err = find_end(&Fixed(3), "x\n\n  ", 2).unwrap_err();
        assert!(matches!(err, BoundaryError::UnparsableRegion { offset: 2, .. }));
    }

    #[test]
    fn whitespace_skipping() {
        assert_eq!(skip_whitespace("  \n x", 0), 4);
        assert_eq!(skip_whitespace("   ", 0), 3);
    }
}
