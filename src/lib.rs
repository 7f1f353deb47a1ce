//! Codecells: named, runnable cells embedded in source files.
//!
//! Running a cell evaluates its body, renders the result and writes it back
//! into the source file as a delimited output block right after the cell,
//! replacing whatever output was recorded there before. Nothing else in
//! the file changes.
//!
//! # Architecture
//!
//! Every write compiles down to one verified byte-span replacement, an
//! [`Edit`]. The work is in computing that span:
//!
//! - [`locate`] maps a 1-based line to a byte offset.
//! - [`boundary`] finds where the cell's own text ends, either with the
//!   language-agnostic [`BracketScanner`] or a tree-sitter grammar ([`ts`]).
//! - [`block`] detects a stale output block immediately after it.
//! - [`patch`] assembles the edit and rewrites the file.
//!
//! A [`FileTracker`] watches files and re-declares their cells into a
//! [`Scope`] whenever the user edits them, so line numbers stay current
//! without running any cell.
//!
//! # Example
//!
//! ```no_run
//! use codecells::Scope;
//!
//! let scope = Scope::new();
//! scope.define("answer", || Ok(6 * 7));
//! scope.load("notebook.py")?;
//!
//! // Writes the rendered `42` below the `answer` cell in notebook.py.
//! let value = scope.run("answer")?;
//! assert_eq!(value.downcast_ref::<i32>(), Some(&42));
//! # Ok::<(), codecells::CellError>(())
//! ```

pub mod block;
pub mod boundary;
pub mod cell;
pub mod config;
pub mod declare;
pub mod edit;
pub mod locate;
pub mod patch;
pub mod pool;
pub mod render;
pub mod tracker;
pub mod ts;

// Re-exports
pub use block::{BlockError, Markers};
pub use boundary::{BoundaryError, BoundaryFinder, BracketScanner};
pub use cell::{Cell, CellBody, CellError, Redeclared, Scope};
pub use config::{discover, load_from_path, load_from_str, Config, ConfigError};
pub use declare::{AnnotationDeclarer, Declaration, DeclareError, Declarer};
pub use edit::{Edit, EditError, EditResult, EditVerification, WriteMode};
pub use locate::LocateError;
pub use patch::{Boundary, PatchError, PatchKind, PatchOutcome, SourcePatcher};
pub use render::{
    write_asset, Artifact, ArtifactRenderer, CellValue, DebugRenderer, RenderError, Renderer,
    RendererRegistry,
};
pub use tracker::{FileTracker, TrackError};
pub use ts::{TreeSitterBoundary, TreeSitterError};
