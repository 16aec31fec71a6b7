//! The diagnostic type carried by every engine and metadata failure.

use std::fmt;

use weft_ir::Span;

use crate::ErrorCode;

/// Severity level for diagnostics.
///
/// Compile-time failures are always errors; the metadata pass may downgrade
/// some findings to warnings.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A diagnostic: stable code, human-readable message, and the byte span of
/// the offending source.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub severity: Severity,
    pub message: String,
    pub span: Span,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(code: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            code,
            severity: Severity::Error,
            message: message.into(),
            span,
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(code: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            code,
            severity: Severity::Warning,
            message: message.into(),
            span,
        }
    }

    /// Replace the span, keeping code and message.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Attach a span only if the current one is the dummy span.
    ///
    /// Used by outer handlers to give position context to errors raised from
    /// span-less helpers.
    #[must_use]
    pub fn or_span(mut self, span: Span) -> Self {
        if self.span == Span::DUMMY {
            self.span = span;
        }
        self
    }

    /// The start byte offset, for boundary error objects.
    pub fn start(&self) -> u32 {
        self.span.start
    }

    /// The end byte offset, for boundary error objects.
    pub fn end(&self) -> u32 {
        self.span.end
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.severity, self.code, self.message)
    }
}

impl std::error::Error for Diagnostic {}

/// Shorthand result type for engine operations.
pub type DiagResult<T> = Result<T, Diagnostic>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_includes_code_and_message() {
        let diag = Diagnostic::error(
            ErrorCode::VariableNotDeclared,
            "Variable 'x' is not declared",
            Span::new(3, 4),
        );
        assert_eq!(
            diag.to_string(),
            "error[variable-not-declared]: Variable 'x' is not declared"
        );
    }

    #[test]
    fn or_span_only_fills_dummy() {
        let diag = Diagnostic::error(ErrorCode::InvalidUpdate, "m", Span::DUMMY)
            .or_span(Span::new(1, 2));
        assert_eq!(diag.span, Span::new(1, 2));

        let kept = Diagnostic::error(ErrorCode::InvalidUpdate, "m", Span::new(5, 6))
            .or_span(Span::new(1, 2));
        assert_eq!(kept.span, Span::new(5, 6));
    }
}
