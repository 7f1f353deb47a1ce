//! Thread-local parser pooling.
//!
//! Creating a tree-sitter parser and loading its grammar is far more
//! expensive than a parse of a typical cell file, so each thread keeps one
//! parser per language and reuses it.

use crate::ts::{SourceParser, TreeSitterError};
use ast_grep_language::SupportLang;
use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    // Keyed by the language's debug name.
    static PARSERS: RefCell<HashMap<String, SourceParser>> = RefCell::new(HashMap::new());
}

/// Execute `f` with the pooled parser for `language`.
///
/// On first call per thread and language, creates a new parser. Subsequent
/// calls reuse the same instance.
///
/// # Example
///
/// ```no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use ast_grep_language::SupportLang;
/// use codecells::pool::with_parser;
///
/// let _tree = with_parser(SupportLang::Python, |parser| parser.parse("x = 1\n"))??;
/// # Ok(())
/// # }
/// ```
pub fn with_parser<F, R>(language: SupportLang, f: F) -> Result<R, TreeSitterError>
where
    F: FnOnce(&mut SourceParser) -> R,
{
    PARSERS.with(|cell| {
        let mut parsers = cell.borrow_mut();
        let key = format!("{language:?}");
        let parser = match parsers.entry(key) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(SourceParser::new(language)?)
            }
        };
        Ok(f(parser))
    })
}

/// Number of parsers pooled on the current thread.
pub fn pooled_count() -> usize {
    PARSERS.with(|cell| cell.borrow().len())
}
