//! Diagnostic collection
//!
//! Passes report problems through an [`ErrorCollector`] rather than failing
//! on the first issue, so one run can surface several independent errors.
//! Rendering collected diagnostics is a consumer concern.

use crate::span::SourceSpan;
use serde::{Deserialize, Serialize};

/// Severity of a reported diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

/// A single collected diagnostic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Where in the source the problem was found
    pub span: SourceSpan,
    /// How bad it is
    pub severity: Severity,
    /// Human-readable description
    pub message: String,
}

/// Collector for diagnostics produced by frontend and lowering passes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorCollector {
    diagnostics: Vec<Diagnostic>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic
    pub fn report(&mut self, span: SourceSpan, severity: Severity, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            span,
            severity,
            message: message.into(),
        });
    }

    /// All diagnostics collected so far, in report order
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Number of `Severity::Error` diagnostics
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    /// Whether any error-severity diagnostic has been reported
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }
}
