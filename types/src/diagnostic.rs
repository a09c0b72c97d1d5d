//! Diagnostics shown alongside goals for the line under the cursor.

use serde::{Deserialize, Serialize};

use crate::position::Range;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from LSP numeric severity (1=Error, 2=Warning, 3=Info, 4=Hint).
    ///
    /// Returns `None` for values outside the LSP-defined range.
    /// Callers (boundary code) decide the fallback policy.
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// A single diagnostic published by the server.
///
/// Fields are private; external consumers read via accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    severity: DiagnosticSeverity,
    message: String,
    range: Range,
    /// Resolved at the boundary; `"lean"` when the server omits it.
    source: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(severity: DiagnosticSeverity, message: String, range: Range, source: String) -> Self {
        Self {
            severity,
            message,
            range,
            source,
        }
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Format as `line:col: severity: message` (1-indexed for display).
    #[must_use]
    pub fn display_short(&self) -> String {
        format!(
            "{}:{}: {}: {}",
            self.range.start.line + 1,
            self.range.start.character + 1,
            self.severity.label(),
            self.message,
        )
    }
}
