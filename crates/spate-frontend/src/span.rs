//! Source span types for error reporting
//!
//! Spans are attached to every AST node by the parser and propagated onto
//! lowered IR statements so later passes can point back at source.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Source location with enough context for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    /// File path (if available)
    pub file: Option<PathBuf>,
    /// Byte offset in source (start)
    pub start: usize,
    /// Byte offset in source (end)
    pub end: usize,
    /// Line number (1-indexed)
    pub line: usize,
    /// Column number (1-indexed)
    pub column: usize,
}

impl SourceSpan {
    /// Create a span from a byte range with known line/column of the start
    pub fn new(start: usize, end: usize, line: usize, column: usize) -> Self {
        Self {
            file: None,
            start,
            end,
            line,
            column,
        }
    }

    /// Create span with file path
    pub fn with_file(mut self, file: PathBuf) -> Self {
        self.file = Some(file);
        self
    }

    /// Span for synthesized nodes with no source counterpart
    pub fn synthetic() -> Self {
        Self::default()
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(path) => write!(f, "{}:{}:{}", path.display(), self.line, self.column),
            None => write!(f, "{}:{}", self.line, self.column),
        }
    }
}
