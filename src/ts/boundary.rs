use crate::boundary::{skip_whitespace, BoundaryError, BoundaryFinder};
use crate::pool::with_parser;
use crate::ts::parser::has_error_nodes;
use ast_grep_language::SupportLang;

/// Boundary finder backed by a tree-sitter grammar.
///
/// The unit is the outermost syntax node starting at the cell's first
/// non-whitespace byte: a whole statement or item, never the enclosing
/// block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeSitterBoundary {
    language: SupportLang,
}

impl TreeSitterBoundary {
    pub fn new(language: SupportLang) -> Self {
        Self { language }
    }

    pub fn language(&self) -> SupportLang {
        self.language
    }
}

impl BoundaryFinder for TreeSitterBoundary {
    fn unit_end(&self, content: &str, start: usize) -> Result<usize, BoundaryError> {
        let begin = skip_whitespace(content, start);

        with_parser(self.language, |parser| {
            let parsed = parser
                .parse_with_source(content)
                .map_err(|e| BoundaryError::unparsable(begin, e.to_string()))?;
            let node = parsed.unit_at(begin).ok_or_else(|| {
                BoundaryError::unparsable(begin, "no syntax node starts at this location")
            })?;
            if has_error_nodes(node) {
                return Err(BoundaryError::unparsable(
                    begin,
                    format!("{} contains syntax errors", node.kind()),
                ));
            }
            Ok(node.end_byte())
        })
        .map_err(|e| BoundaryError::unparsable(begin, e.to_string()))?
    }
}
