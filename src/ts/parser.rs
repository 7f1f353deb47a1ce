use crate::ts::errors::TreeSitterError;
use ast_grep_language::{LanguageExt, SupportLang};
use std::path::Path;
use tree_sitter::{Parser, Tree};

/// Map a file extension to a bundled grammar.
pub fn language_for_path(path: &Path) -> Result<SupportLang, TreeSitterError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let lang = match ext {
        "rs" => SupportLang::Rust,
        "py" | "pyi" => SupportLang::Python,
        "js" | "mjs" | "cjs" => SupportLang::JavaScript,
        "ts" | "mts" => SupportLang::TypeScript,
        "go" => SupportLang::Go,
        "c" | "h" => SupportLang::C,
        "cc" | "cpp" | "cxx" | "hpp" => SupportLang::Cpp,
        "java" => SupportLang::Java,
        "rb" => SupportLang::Ruby,
        "lua" => SupportLang::Lua,
        _ => {
            return Err(TreeSitterError::UnsupportedPath {
                path: path.to_path_buf(),
            })
        }
    };
    Ok(lang)
}

/// Map a configuration name (`"rust"`, `"python"`, ...) to a bundled grammar.
pub fn language_by_name(name: &str) -> Result<SupportLang, TreeSitterError> {
    let lang = match name.to_ascii_lowercase().as_str() {
        "rust" | "rs" => SupportLang::Rust,
        "python" | "py" => SupportLang::Python,
        "javascript" | "js" => SupportLang::JavaScript,
        "typescript" | "ts" => SupportLang::TypeScript,
        "go" => SupportLang::Go,
        "c" => SupportLang::C,
        "cpp" | "c++" => SupportLang::Cpp,
        "java" => SupportLang::Java,
        "ruby" | "rb" => SupportLang::Ruby,
        "lua" => SupportLang::Lua,
        _ => {
            return Err(TreeSitterError::UnknownLanguage {
                name: name.to_string(),
            })
        }
    };
    Ok(lang)
}

/// Tree-sitter parser bound to one grammar.
pub struct SourceParser {
    parser: Parser,
    language: SupportLang,
}

impl SourceParser {
    pub fn new(language: SupportLang) -> Result<Self, TreeSitterError> {
        let mut parser = Parser::new();
        let ts_lang = language.get_ts_language();
        parser
            .set_language(&ts_lang)
            .map_err(|_| TreeSitterError::LanguageSet {
                language: format!("{language:?}"),
            })?;

        Ok(Self { parser, language })
    }

    pub fn language(&self) -> SupportLang {
        self.language
    }

    /// Parse source code into a tree-sitter Tree.
    pub fn parse(&mut self, source: &str) -> Result<Tree, TreeSitterError> {
        self.parser
            .parse(source, None)
            .ok_or(TreeSitterError::ParseFailed)
    }

    /// Parse source code and return the tree along with the source.
    pub fn parse_with_source<'a>(
        &mut self,
        source: &'a str,
    ) -> Result<ParsedSource<'a>, TreeSitterError> {
        let tree = self.parse(source)?;
        Ok(ParsedSource { source, tree })
    }
}

/// A parsed source file with its tree-sitter tree.
pub struct ParsedSource<'a> {
    pub source: &'a str,
    pub tree: Tree,
}

impl<'a> ParsedSource<'a> {
    pub fn root_node(&self) -> tree_sitter::Node<'_> {
        self.tree.root_node()
    }

    /// The outermost node that starts exactly at `offset` and is not the
    /// root, i.e. the whole item or statement beginning there.
    pub fn unit_at(&self, offset: usize) -> Option<tree_sitter::Node<'_>> {
        let root = self.tree.root_node();
        let mut node = root.descendant_for_byte_range(offset, offset)?;
        if node.start_byte() != offset {
            return None;
        }

        while let Some(parent) = node.parent() {
            if parent.start_byte() != offset || parent.id() == root.id() {
                break;
            }
            node = parent;
        }

        (node.id() != root.id()).then_some(node)
    }

    /// Extract text for a node's byte range.
    pub fn node_text(&self, node: tree_sitter::Node<'_>) -> &'a str {
        &self.source[node.byte_range()]
    }
}

/// Whether the subtree contains ERROR or MISSING nodes.
pub fn has_error_nodes(node: tree_sitter::Node<'_>) -> bool {
    if node.is_error() || node.is_missing() {
        return true;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if has_error_nodes(child) {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_rust() {
        let mut parser = SourceParser::new(SupportLang::Rust).unwrap();
        let parsed = parser.parse_with_source("fn main() { println!(\"hello\"); }").unwrap();

        assert!(!has_error_nodes(parsed.root_node()));
        assert_eq!(parsed.root_node().kind(), "source_file");
    }

    #[test]
    fn parse_invalid_rust() {
        let mut parser = SourceParser::new(SupportLang::Rust).unwrap();
        let parsed = parser.parse_with_source("fn main( { }").unwrap();

        assert!(has_error_nodes(parsed.root_node()));
    }

    #[test]
    fn unit_at_finds_whole_item() {
        let mut parser = SourceParser::new(SupportLang::Rust).unwrap();
        let source = "fn foo() {}\nfn bar() { 1 }\n";
        let parsed = parser.parse_with_source(source).unwrap();

        let node = parsed.unit_at(12).unwrap();
        assert_eq!(parsed.node_text(node), "fn bar() { 1 }");
        assert!(parsed.unit_at(14).is_none());
    }

    #[test]
    fn languages_from_paths_and_names() {
        assert_eq!(
            language_for_path(Path::new("nb/cells.py")).unwrap(),
            SupportLang::Python
        );
        assert_eq!(language_by_name("Rust").unwrap(), SupportLang::Rust);
        assert!(matches!(
            language_for_path(Path::new("notes.txt")),
            Err(TreeSitterError::UnsupportedPath { .. })
        ));
        assert!(language_by_name("cobol").is_err());
    }
}
