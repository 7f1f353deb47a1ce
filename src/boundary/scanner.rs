//! A small dedicated scanner for cell boundaries.
//!
//! Works on any bracket-based language without a grammar: a unit is the run
//! of lines starting at the cell that ends on the first line where every
//! `(`, `[` and `{` has been closed. String literals, line comments and
//! trailing-backslash continuations are honoured so brackets inside them
//! don't count.

use super::{skip_whitespace, BoundaryError, BoundaryFinder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketScanner {
    comment_leaders: Vec<String>,
}

impl Default for BracketScanner {
    fn default() -> Self {
        Self::new(["#"])
    }
}

impl BracketScanner {
    /// Create a scanner treating each of `comment_leaders` as the start of a
    /// comment that runs to the end of the line.
    pub fn new<I, S>(comment_leaders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            comment_leaders: comment_leaders
                .into_iter()
                .map(Into::into)
                .filter(|leader: &String| !leader.is_empty())
                .collect(),
        }
    }

    pub fn comment_leaders(&self) -> &[String] {
        &self.comment_leaders
    }

    fn comment_at(&self, bytes: &[u8], idx: usize) -> bool {
        self.comment_leaders
            .iter()
            .any(|leader| bytes[idx..].starts_with(leader.as_bytes()))
    }
}

impl BoundaryFinder for BracketScanner {
    fn unit_end(&self, content: &str, start: usize) -> Result<usize, BoundaryError> {
        let bytes = content.as_bytes();
        let begin = skip_whitespace(content, start);
        let mut open: Vec<(u8, usize)> = Vec::new();
        let mut idx = begin;

        while idx < bytes.len() {
            let byte = bytes[idx];

            if self.comment_at(bytes, idx) {
                idx = bytes[idx..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(bytes.len(), |pos| idx + pos);
                continue;
            }

            match byte {
                b'"' | b'\'' => {
                    idx = skip_string(bytes, idx)?;
                    continue;
                }
                b'(' | b'[' | b'{' => open.push((byte, idx)),
                b')' | b']' | b'}' => match open.pop() {
                    Some((opener, _)) if closer_for(opener) == byte => {}
                    Some((opener, at)) => {
                        return Err(BoundaryError::unparsable(
                            idx,
                            format!(
                                "'{}' does not close '{}' opened at byte {at}",
                                byte as char, opener as char
                            ),
                        ));
                    }
                    None => {
                        return Err(BoundaryError::unparsable(
                            idx,
                            format!("unexpected '{}'", byte as char),
                        ));
                    }
                },
                b'\\' if bytes.get(idx + 1) == Some(&b'\n') => {
                    idx += 2;
                    continue;
                }
                b'\n' if open.is_empty() => return Ok(idx + 1),
                _ => {}
            }
            idx += 1;
        }

        match open.last() {
            Some((opener, at)) => Err(BoundaryError::unparsable(
                *at,
                format!("'{}' is never closed", *opener as char),
            )),
            None => Ok(bytes.len()),
        }
    }
}

fn closer_for(opener: u8) -> u8 {
    match opener {
        b'(' => b')',
        b'[' => b']',
        _ => b'}',
    }
}

/// Skip the string literal opening at `idx`, returning the offset past it.
///
/// Triple-quoted and double-quoted strings may span lines. A lifetime, or a
/// single quote with no partner on the same line, is a plain character.
fn skip_string(bytes: &[u8], idx: usize) -> Result<usize, BoundaryError> {
    let quote = bytes[idx];
    let triple = [quote; 3];

    if bytes[idx..].starts_with(&triple) {
        let body = idx + 3;
        return bytes[body..]
            .windows(3)
            .position(|w| w == triple)
            .map(|pos| body + pos + 3)
            .ok_or_else(|| BoundaryError::unparsable(idx, "unterminated triple-quoted string"));
    }

    if quote == b'\'' && is_lifetime(bytes, idx) {
        return Ok(idx + 1);
    }

    let mut pos = idx + 1;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 2,
            b if b == quote => return Ok(pos + 1),
            b'\n' if quote == b'\'' => return Ok(idx + 1),
            _ => pos += 1,
        }
    }

    if quote == b'\'' {
        Ok(idx + 1)
    } else {
        Err(BoundaryError::unparsable(idx, "unterminated string literal"))
    }
}

/// `'ident` not closed right after the identifier, as in `&'a str`.
fn is_lifetime(bytes: &[u8], idx: usize) -> bool {
    let ident = |b: &u8| b.is_ascii_alphanumeric() || *b == b'_';
    match bytes.get(idx + 1) {
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' => {}
        _ => return false,
    }
    let after = bytes[idx + 1..]
        .iter()
        .position(|b| !ident(b))
        .map_or(bytes.len(), |pos| idx + 1 + pos);
    bytes.get(after) != Some(&b'\'')
}
