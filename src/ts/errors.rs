use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeSitterError {
    #[error("failed to set language {language} for parser")]
    LanguageSet { language: String },

    #[error("failed to parse source code")]
    ParseFailed,

    #[error("no tree-sitter grammar known for {path}")]
    UnsupportedPath { path: PathBuf },

    #[error("unknown language name: {name}")]
    UnknownLanguage { name: String },
}
