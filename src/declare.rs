//! Finding cell declarations in source text.
//!
//! A [`Declarer`] reads a file's content and reports which cells it declares
//! and at which line each cell's code starts. It never runs anything.

use crate::block::Markers;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeclareError {
    #[error("{path}:{line}: invalid cell name {name:?}")]
    InvalidName {
        path: PathBuf,
        line: usize,
        name: String,
    },

    #[error("{path}:{line}: cell {name:?} has no code after its annotation")]
    Dangling {
        path: PathBuf,
        line: usize,
        name: String,
    },

    #[error("{path}: cell {name:?} declared twice (lines {first} and {second})")]
    Duplicate {
        path: PathBuf,
        name: String,
        first: usize,
        second: usize,
    },
}

/// One cell found in a file.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Declaration {
    pub name: String,
    /// 1-based line where the cell's code starts.
    pub line: usize,
}

pub trait Declarer: Send + Sync {
    fn declare(&self, path: &Path, content: &str) -> Result<Vec<Declaration>, DeclareError>;
}

/// Declares cells from comment annotations:
///
/// ```text
/// # @cell totals
/// totals = summarize(rows)
/// ```
///
/// The cell starts at the first line after the annotation that is neither
/// blank nor a comment. Output blocks are skipped entirely.
#[derive(Debug, Clone)]
pub struct AnnotationDeclarer {
    leaders: Vec<String>,
    markers: Markers,
}

impl Default for AnnotationDeclarer {
    fn default() -> Self {
        Self::new(["#", "//"], Markers::default())
    }
}

impl AnnotationDeclarer {
    pub fn new<I, S>(leaders: I, markers: Markers) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            leaders: leaders
                .into_iter()
                .map(Into::into)
                .filter(|leader: &String| !leader.is_empty())
                .collect(),
            markers,
        }
    }

    fn comment_body<'a>(&self, line: &'a str) -> Option<&'a str> {
        let trimmed = line.trim_start();
        self.leaders
            .iter()
            .find_map(|leader| trimmed.strip_prefix(leader.as_str()))
    }

    /// The cell name if `line` is an annotation.
    fn annotation<'a>(&self, line: &'a str) -> Option<&'a str> {
        let body = self.comment_body(line)?.trim();
        let rest = body.strip_prefix("@cell")?;
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            return None;
        }
        Some(rest.trim())
    }
}

fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Declarer for AnnotationDeclarer {
    fn declare(&self, path: &Path, content: &str) -> Result<Vec<Declaration>, DeclareError> {
        let bytes = content.as_bytes();
        let mut declarations: Vec<Declaration> = Vec::new();
        let mut pending: Option<(String, usize)> = None;
        let mut offset = 0;
        let mut line = 1;

        while offset < bytes.len() {
            let block_end = self.markers.find_block_end(bytes, offset).unwrap_or(offset);
            if block_end > offset {
                line += bytes[offset..block_end].iter().filter(|&&b| b == b'\n').count();
                offset = block_end;
                continue;
            }

            let eol = bytes[offset..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(bytes.len(), |pos| offset + pos);
            // A block opened after code on this line, as written when the file
            // had no final newline.
            let inline_block = self.markers.trailing_prefix(bytes, offset).and_then(|start| {
                let end = self.markers.find_block_end(bytes, start).ok()?;
                Some((start, end))
            });
            let text = match inline_block {
                Some((start, _)) => &content[offset..start],
                None => &content[offset..eol],
            };

            if let Some(name) = self.annotation(text) {
                if !valid_name(name) {
                    return Err(DeclareError::InvalidName {
                        path: path.to_path_buf(),
                        line,
                        name: name.to_string(),
                    });
                }
                if let Some((name, at)) = pending.take() {
                    return Err(DeclareError::Dangling {
                        path: path.to_path_buf(),
                        line: at,
                        name,
                    });
                }
                pending = Some((name.to_string(), line));
            } else if !text.trim().is_empty() && self.comment_body(text).is_none() {
                if let Some((name, _)) = pending.take() {
                    if let Some(first) = declarations.iter().find(|d| d.name == name) {
                        return Err(DeclareError::Duplicate {
                            path: path.to_path_buf(),
                            name,
                            first: first.line,
                            second: line,
                        });
                    }
                    declarations.push(Declaration { name, line });
                }
            }

            match inline_block {
                Some((_, end)) => {
                    line += bytes[offset..end].iter().filter(|&&b| b == b'\n').count();
                    offset = end;
                }
                None => {
                    offset = eol + 1;
                    line += 1;
                }
            }
        }

        if let Some((name, at)) = pending {
            return Err(DeclareError::Dangling {
                path: path.to_path_buf(),
                line: at,
                name,
            });
        }

        Ok(declarations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declare(content: &str) -> Result<Vec<Declaration>, DeclareError> {
        AnnotationDeclarer::default().declare(Path::new("nb.py"), content)
    }

    fn decl(name: &str, line: usize) -> Declaration {
        Declaration {
            name: name.to_string(),
            line,
        }
    }

    #[test]
    fn finds_annotated_cells() {
        let content = "import math\n\n# @cell radius\nr = 2\n\n# @cell area\n# area of the circle\n\narea = math.pi * r ** 2\n";
        assert_eq!(
            declare(content).unwrap(),
            vec![decl("radius", 4), decl("area", 9)]
        );
    }

    #[test]
    fn skips_output_blocks_when_counting_lines() {
        let markers = Markers::default();
        let content = format!(
            "# @cell a\na = 1\n{}# @cell b\nb = 2\n",
            markers.render_block("1\nline two")
        );
        assert_eq!(declare(&content).unwrap(), vec![decl("a", 2), decl("b", 8)]);
    }

    #[test]
    fn block_opened_after_code_is_skipped() {
        let markers = Markers::default();
        let content = format!(
            "# @cell a\na = 1{}# @cell b\nb = 2",
            markers.render_block("# @cell not_a_cell\n2")
        );
        assert_eq!(declare(&content).unwrap(), vec![decl("a", 2), decl("b", 7)]);
    }

    #[test]
    fn slash_leader_and_indentation() {
        let content = "fn main() {\n    // @cell answer\n    let x = 42;\n}\n";
        assert_eq!(declare(content).unwrap(), vec![decl("answer", 3)]);
    }

    #[test]
    fn near_miss_annotations_are_plain_comments() {
        let content = "# @cells not_one\nx = 1\n# @celldata\ny = 2\n";
        assert_eq!(declare(content).unwrap(), vec![]);
    }

    #[test]
    fn invalid_name() {
        let err = declare("# @cell 9lives\nx = 1\n").unwrap_err();
        assert!(matches!(err, DeclareError::InvalidName { line: 1, .. }));

        let err = declare("# @cell\nx = 1\n").unwrap_err();
        assert!(matches!(err, DeclareError::InvalidName { .. }));
    }

    #[test]
    fn dangling_annotation() {
        let err = declare("x = 1\n# @cell tail\n\n").unwrap_err();
        assert_eq!(
            err,
            DeclareError::Dangling {
                path: PathBuf::from("nb.py"),
                line: 2,
                name: "tail".to_string()
            }
        );

        let err = declare("# @cell a\n# @cell b\nx = 1\n").unwrap_err();
        assert!(matches!(err, DeclareError::Dangling { line: 1, .. }));
    }

    #[test]
    fn duplicate_names() {
        let err = declare("# @cell a\nx = 1\n# @cell a\ny = 2\n").unwrap_err();
        assert!(matches!(
            err,
            DeclareError::Duplicate {
                first: 2,
                second: 4,
                ..
            }
        ));
    }
}
