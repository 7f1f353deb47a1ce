//! Tree-sitter integration for grammar-aware boundary finding.
//!
//! Grammars come from `ast-grep-language`, so any language it bundles can
//! host cells. The parse tree is only used to measure one unit; comments
//! and formatting in the file are never touched.

pub mod boundary;
pub mod errors;
pub mod parser;

pub use boundary::TreeSitterBoundary;
pub use errors::TreeSitterError;
pub use parser::{language_by_name, language_for_path, ParsedSource, SourceParser};
