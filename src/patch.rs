//! The source-patch engine.
//!
//! Given a cell's line and its rendered result, replace the output block
//! that sits right after the cell (or insert one) and rewrite the file.
//! Only the bytes between the end of the cell's text and the end of the
//! stale block change; everything else is preserved verbatim.
//!
//! The read-modify-write is not locked. Two invocations patching the same
//! file at once can race; callers that care must serialize invocations per
//! file. The before-text check in [`Edit`] turns most such races into a
//! [`PatchError::ConcurrentChange`] instead of a silent overwrite.

use crate::block::{BlockError, Markers};
use crate::boundary::{self, BoundaryError, BoundaryFinder, BracketScanner};
use crate::edit::{write_file, Edit, EditError, EditResult, WriteMode};
use crate::locate::{self, LocateError};
use crate::ts::{language_for_path, TreeSitterBoundary, TreeSitterError};
use ast_grep_language::SupportLang;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("{path}: line {line} is out of range (file has {line_count} lines)")]
    LineOutOfRange {
        path: PathBuf,
        line: usize,
        line_count: usize,
    },

    #[error("{path}: cannot parse cell at byte {offset}: {reason}")]
    UnparsableRegion {
        path: PathBuf,
        offset: usize,
        reason: String,
    },

    #[error("{path}: output block at byte {offset} has no closing marker")]
    UnterminatedBlock { path: PathBuf, offset: usize },

    #[error("rendered output contains the closing marker and would corrupt {path}")]
    MarkerCollision { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8")]
    NotUtf8 { path: PathBuf },

    #[error("failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} changed while it was being patched")]
    ConcurrentChange { path: PathBuf },

    #[error(transparent)]
    Language(#[from] TreeSitterError),
}

impl PatchError {
    fn from_edit(path: &Path, err: EditError) -> Self {
        match err {
            EditError::Read { path, source } => PatchError::Read { path, source },
            EditError::WriteFailed { path, source } => PatchError::WriteFailed { path, source },
            EditError::Utf8(_) | EditError::InvalidUtf8Edit => PatchError::NotUtf8 {
                path: path.to_path_buf(),
            },
            EditError::BeforeTextMismatch { .. } | EditError::InvalidByteRange { .. } => {
                PatchError::ConcurrentChange {
                    path: path.to_path_buf(),
                }
            }
        }
    }
}

/// Which boundary finder measures cells.
#[derive(Clone)]
pub enum Boundary {
    /// The grammar-free bracket scanner.
    Scanner(BracketScanner),
    /// A fixed tree-sitter grammar.
    TreeSitter(SupportLang),
    /// A tree-sitter grammar picked from each file's extension.
    TreeSitterByExtension,
    Custom(Arc<dyn BoundaryFinder>),
}

impl Default for Boundary {
    fn default() -> Self {
        Boundary::Scanner(BracketScanner::default())
    }
}

impl std::fmt::Debug for Boundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Boundary::Scanner(scanner) => f.debug_tuple("Scanner").field(scanner).finish(),
            Boundary::TreeSitter(lang) => f.debug_tuple("TreeSitter").field(lang).finish(),
            Boundary::TreeSitterByExtension => f.write_str("TreeSitterByExtension"),
            Boundary::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Boundary {
    fn find_end(&self, path: &Path, content: &str, start: usize) -> Result<usize, PatchError> {
        let result = match self {
            Boundary::Scanner(scanner) => boundary::find_end(scanner, content, start),
            Boundary::TreeSitter(lang) => {
                boundary::find_end(&TreeSitterBoundary::new(*lang), content, start)
            }
            Boundary::TreeSitterByExtension => {
                let finder = TreeSitterBoundary::new(language_for_path(path)?);
                boundary::find_end(&finder, content, start)
            }
            Boundary::Custom(finder) => boundary::find_end(finder.as_ref(), content, start),
        };

        result.map_err(|err| match err {
            BoundaryError::UnparsableRegion { offset, reason } => PatchError::UnparsableRegion {
                path: path.to_path_buf(),
                offset,
                reason,
            },
            BoundaryError::InvalidStart { offset, len } => PatchError::UnparsableRegion {
                path: path.to_path_buf(),
                offset,
                reason: format!("start is outside content of length {len}"),
            },
        })
    }
}

/// What a patch did to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    /// No block followed the cell; a new one was inserted.
    Inserted,
    /// A stale block was replaced.
    Replaced,
    /// The block already held this output; nothing was written.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    pub kind: PatchKind,
    /// Span of the original content that was replaced.
    pub replaced: Range<usize>,
}

/// Splices rendered output after cells.
#[derive(Debug, Clone, Default)]
pub struct SourcePatcher {
    markers: Markers,
    boundary: Boundary,
    write_mode: WriteMode,
}

impl SourcePatcher {
    pub fn new(markers: Markers, boundary: Boundary) -> Self {
        Self {
            markers,
            boundary,
            write_mode: WriteMode::default(),
        }
    }

    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    /// Compute the edit that puts `rendered` after the cell at `line`.
    pub fn plan(
        &self,
        path: &Path,
        content: &str,
        line: usize,
        rendered: &str,
    ) -> Result<Edit, PatchError> {
        self.check_collision(path, rendered)?;

        let bytes = content.as_bytes();
        let offset_before = locate::line_offset(bytes, line).map_err(|err| match err {
            LocateError::LineOutOfRange { line, line_count } => PatchError::LineOutOfRange {
                path: path.to_path_buf(),
                line,
                line_count,
            },
            LocateError::OffsetOutOfRange { .. } => PatchError::LineOutOfRange {
                path: path.to_path_buf(),
                line,
                line_count: locate::line_count(bytes),
            },
        })?;
        // Finders see earlier output blocks as blank space.
        let masked = self.markers.mask_blocks(content);
        let measured = masked.as_deref().unwrap_or(content);
        let mut offset_after_expr = self.boundary.find_end(path, measured, offset_before)?;

        // A block written after a final line with no newline opens on that
        // line; the cell's text stops at its prefix.
        let last_line = bytes[..offset_after_expr.saturating_sub(1)]
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |pos| pos + 1)
            .max(offset_before);
        if let Some(start) = self.markers.trailing_prefix(bytes, last_line) {
            offset_after_expr = offset_after_expr.min(start);
        }
        let offset_after_block = self
            .markers
            .find_block_end(bytes, offset_after_expr)
            .map_err(|BlockError::Unterminated { offset }| PatchError::UnterminatedBlock {
                path: path.to_path_buf(),
                offset,
            })?;

        tracing::debug!(
            path = %path.display(),
            line,
            offset_before,
            offset_after_expr,
            offset_after_block,
            "planned output block"
        );

        Ok(Edit::new(
            path,
            offset_after_expr,
            offset_after_block,
            self.markers.render_block(rendered),
            &content[offset_after_expr..offset_after_block],
        ))
    }

    fn check_collision(&self, path: &Path, rendered: &str) -> Result<(), PatchError> {
        if self.markers.collides(rendered) {
            return Err(PatchError::MarkerCollision {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }

    /// The file content `patch` would produce, without writing it.
    pub fn preview(&self, path: &Path, line: usize, rendered: &str) -> Result<String, PatchError> {
        self.check_collision(path, rendered)?;
        let content = read_source(path)?;
        let edit = self.plan(path, &content, line, rendered)?;
        let spliced = edit
            .splice(content.as_bytes())
            .map_err(|err| PatchError::from_edit(path, err))?;
        String::from_utf8(spliced).map_err(|_| PatchError::NotUtf8 {
            path: path.to_path_buf(),
        })
    }

    /// Write `rendered` as the output block of the cell at `line`.
    pub fn patch(
        &self,
        path: &Path,
        line: usize,
        rendered: &str,
    ) -> Result<PatchOutcome, PatchError> {
        self.check_collision(path, rendered)?;
        let content = read_source(path)?;
        let edit = self.plan(path, &content, line, rendered)?;
        let replaced = edit.byte_start..edit.byte_end;

        let result = edit
            .apply_with(self.write_mode)
            .map_err(|err| PatchError::from_edit(path, err))?;

        let kind = match result {
            EditResult::AlreadyApplied { .. } => PatchKind::Unchanged,
            EditResult::Applied { .. } if replaced.is_empty() => PatchKind::Inserted,
            EditResult::Applied { .. } => PatchKind::Replaced,
        };
        tracing::debug!(path = %path.display(), line, ?kind, "patched output block");

        Ok(PatchOutcome { kind, replaced })
    }

    /// Remove every output block from the file. Returns how many were removed.
    pub fn strip(&self, path: &Path) -> Result<usize, PatchError> {
        let content = read_source(path)?;
        let (stripped, removed) =
            self.markers
                .strip_blocks(&content)
                .map_err(|BlockError::Unterminated { offset }| PatchError::UnterminatedBlock {
                    path: path.to_path_buf(),
                    offset,
                })?;

        if removed > 0 {
            write_file(path, stripped.as_bytes(), self.write_mode).map_err(|source| {
                PatchError::WriteFailed {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
        }
        Ok(removed)
    }
}

fn read_source(path: &Path) -> Result<String, PatchError> {
    let bytes = fs::read(path).map_err(|source| PatchError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| PatchError::NotUtf8 {
        path: path.to_path_buf(),
    })
}
