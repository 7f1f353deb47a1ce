use serde::Deserialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// Byte-span replacement with verification.
///
/// The patch engine computes a span and compiles down to this primitive;
/// applying it re-reads the file, checks the span still holds what the
/// engine saw, and rewrites the whole file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Edit does nothing until apply() is called"]
pub struct Edit {
    pub file: PathBuf,
    /// Starting byte offset (inclusive)
    pub byte_start: usize,
    /// Ending byte offset (exclusive)
    pub byte_end: usize,
    /// New text to insert at [byte_start, byte_end)
    pub new_text: String,
    /// What we expect to find in the span before applying
    pub expected_before: EditVerification,
}

/// Verification strategy for edit safety.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditVerification {
    /// Exact text match required
    ExactMatch(String),
    /// xxh3 hash of expected text (cheaper for large spans)
    Hash(u64),
}

impl EditVerification {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            EditVerification::ExactMatch(expected) => text == expected,
            EditVerification::Hash(expected_hash) => xxh3_64(text.as_bytes()) == *expected_hash,
        }
    }

    /// Create verification from text, using hash for text over 1KB.
    pub fn from_text(text: &str) -> Self {
        if text.len() > 1024 {
            EditVerification::Hash(xxh3_64(text.as_bytes()))
        } else {
            EditVerification::ExactMatch(text.to_string())
        }
    }
}

/// How the rewritten file reaches the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Reopen the existing file, truncate it and write the new content.
    /// Fails if the file disappeared in the meantime.
    #[default]
    Truncate,
    /// Write a tempfile next to the target, fsync, rename over it.
    Atomic,
}

#[derive(Error, Debug)]
pub enum EditError {
    #[error("Before-text verification failed at {file}:{byte_start}")]
    BeforeTextMismatch {
        file: PathBuf,
        byte_start: usize,
        byte_end: usize,
        found: String,
    },

    #[error("Invalid byte range: [{byte_start}, {byte_end}) in file of length {file_len}")]
    InvalidByteRange {
        byte_start: usize,
        byte_end: usize,
        file_len: usize,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("UTF-8 validation error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Invalid edit would create malformed UTF-8")]
    InvalidUtf8Edit,
}

/// Result of applying an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "EditResult should be checked for success/already-applied"]
pub enum EditResult {
    Applied { file: PathBuf, bytes_changed: usize },
    /// The span already holds `new_text`; nothing was written.
    AlreadyApplied { file: PathBuf },
}

impl Edit {
    /// Create a new edit with automatic verification generation.
    pub fn new(
        file: impl Into<PathBuf>,
        byte_start: usize,
        byte_end: usize,
        new_text: impl Into<String>,
        expected_before: impl AsRef<str>,
    ) -> Self {
        Self {
            file: file.into(),
            byte_start,
            byte_end,
            new_text: new_text.into(),
            expected_before: EditVerification::from_text(expected_before.as_ref()),
        }
    }

    /// Validate the edit against the current file contents.
    ///
    /// Returns the current text at [byte_start, byte_end) if validation succeeds.
    fn validate<'a>(&self, content: &'a [u8]) -> Result<&'a str, EditError> {
        if self.byte_start > self.byte_end || self.byte_end > content.len() {
            return Err(EditError::InvalidByteRange {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
                file_len: content.len(),
            });
        }

        let current_text = std::str::from_utf8(&content[self.byte_start..self.byte_end])?;

        // Idempotency: the span already holds the new text
        if current_text == self.new_text {
            return Ok(current_text);
        }

        if !self.expected_before.matches(current_text) {
            return Err(EditError::BeforeTextMismatch {
                file: self.file.clone(),
                byte_start: self.byte_start,
                byte_end: self.byte_end,
                found: current_text.to_string(),
            });
        }

        Ok(current_text)
    }

    /// Splice the edit into `content` without touching the file system.
    pub fn splice(&self, content: &[u8]) -> Result<Vec<u8>, EditError> {
        self.validate(content)?;

        let mut new_content = Vec::with_capacity(
            content.len() - (self.byte_end - self.byte_start) + self.new_text.len(),
        );
        new_content.extend_from_slice(&content[..self.byte_start]);
        new_content.extend_from_slice(self.new_text.as_bytes());
        new_content.extend_from_slice(&content[self.byte_end..]);

        std::str::from_utf8(&new_content).map_err(|_| EditError::InvalidUtf8Edit)?;
        Ok(new_content)
    }

    /// Apply this edit with [`WriteMode::Truncate`].
    pub fn apply(&self) -> Result<EditResult, EditError> {
        self.apply_with(WriteMode::default())
    }

    /// Apply this edit, writing the whole file in the given mode.
    pub fn apply_with(&self, mode: WriteMode) -> Result<EditResult, EditError> {
        let original_content = fs::read(&self.file).map_err(|source| EditError::Read {
            path: self.file.clone(),
            source,
        })?;

        if self.validate(&original_content)? == self.new_text {
            return Ok(EditResult::AlreadyApplied {
                file: self.file.clone(),
            });
        }

        let new_content = self.splice(&original_content)?;
        write_file(&self.file, &new_content, mode).map_err(|source| EditError::WriteFailed {
            path: self.file.clone(),
            source,
        })?;

        Ok(EditResult::Applied {
            file: self.file.clone(),
            bytes_changed: self.new_text.len(),
        })
    }
}

/// Write `content` to `path` in full.
pub fn write_file(path: &Path, content: &[u8], mode: WriteMode) -> std::io::Result<()> {
    match mode {
        WriteMode::Truncate => {
            let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
            file.write_all(content)?;
            file.flush()?;
        }
        WriteMode::Atomic => atomic_write(path, content)?,
    }

    // Update mtime so watchers see rewrites landing in the same tick
    filetime::set_file_mtime(path, filetime::FileTime::now())?;
    Ok(())
}

/// Atomic file write: tempfile + fsync + rename.
fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    // Tempfile must live on the same filesystem for the rename
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_verification_exact_match() {
        let verify = EditVerification::ExactMatch("hello world".to_string());
        assert!(verify.matches("hello world"));
        assert!(!verify.matches("hello"));
    }

    #[test]
    fn test_edit_verification_from_text_large() {
        let text = "x".repeat(2000);
        let verify = EditVerification::from_text(&text);
        assert!(matches!(verify, EditVerification::Hash(_)));
        assert!(verify.matches(&text));
    }

    #[test]
    fn test_edit_validation_invalid_range() {
        let edit = Edit::new("test.txt", 5, 20, "replacement", "");
        let result = edit.validate(b"hello world");
        assert!(matches!(result, Err(EditError::InvalidByteRange { .. })));

        let edit = Edit::new("test.txt", 10, 5, "replacement", "");
        let result = edit.validate(b"hello world");
        assert!(matches!(result, Err(EditError::InvalidByteRange { .. })));
    }

    #[test]
    fn test_splice_insertion() {
        let edit = Edit::new("test.txt", 6, 6, "big ", "");
        let out = edit.splice(b"hello world").unwrap();
        assert_eq!(out, b"hello big world");
    }

    #[test]
    fn test_truncate_write() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        fs::write(&file_path, b"original content").unwrap();

        let edit = Edit::new(&file_path, 0, 8, "new", "original");
        let result = edit.apply().unwrap();

        assert!(matches!(result, EditResult::Applied { .. }));
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "new content");
    }

    #[test]
    fn test_atomic_write() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        fs::write(&file_path, b"original content").unwrap();

        let edit = Edit::new(&file_path, 0, 8, "modified", "original");
        let result = edit.apply_with(WriteMode::Atomic).unwrap();

        assert!(matches!(result, EditResult::Applied { .. }));
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "modified content");
    }

    #[test]
    fn test_edit_idempotency_application() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        fs::write(&file_path, b"hello world").unwrap();

        let edit = Edit::new(&file_path, 0, 5, "hello", "hello");
        let result = edit.apply().unwrap();

        assert!(matches!(result, EditResult::AlreadyApplied { .. }));
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "hello world");
    }

    #[test]
    fn test_before_text_mismatch() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        fs::write(&file_path, b"hello world").unwrap();

        let edit = Edit::new(&file_path, 0, 5, "HELLO", "howdy");
        assert!(matches!(
            edit.apply(),
            Err(EditError::BeforeTextMismatch { .. })
        ));
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "hello world");
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let edit = Edit::new(temp_dir.path().join("gone.txt"), 0, 0, "x", "");
        assert!(matches!(edit.apply(), Err(EditError::Read { .. })));
    }
}
