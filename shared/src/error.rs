//! Parse errors for symbol tables and raw stack dumps

use thiserror::Error;

/// Errors produced while parsing symbol listings or stack dumps.
///
/// A parse error is always fatal for the source being parsed: callers must
/// treat the whole input as unusable.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line {line}: malformed stack header {content:?}")]
    MalformedHeader { line: usize, content: String },

    #[error("line {line}: CPU number is not an integer in {content:?}")]
    InvalidCpu { line: usize, content: String },

    #[error("line {line}: address unparsable {content:?}")]
    InvalidAddress { line: usize, content: String },

    #[error("line {line}: no active stack for address {content:?}")]
    NoActiveStack { line: usize, content: String },

    #[error("line {line}: expected `<address> <kind> <name>`, got {content:?}")]
    SymbolLine { line: usize, content: String },

    #[error("line {line}: symbol kind must be a single character, got {kind:?}")]
    SymbolKind { line: usize, kind: String },

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}
