//! Diagnostics: analysis and runtime error reporting.
//!
//! Semantic errors are accumulated so one run surfaces as many problems as
//! possible; evaluation refuses to start while any error is pending. Runtime
//! errors abort the current evaluation instead.

use std::sync::Arc;

use super::position::Span;

// ============================================================================
// DIAGNOSTIC TYPES
// ============================================================================

/// Severity level of a diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Reported, never aborts.
    Warning,
    /// Malformed source text.
    SyntaxError,
    /// Static semantic violation; evaluation will not start.
    SemanticError,
    /// Aborts the current evaluation.
    RuntimeError,
    /// Non-fatal numeric failure during constant folding.
    MathError,
}

impl Severity {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Severity::SyntaxError | Severity::SemanticError | Severity::RuntimeError
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::SyntaxError => "syntax error",
            Severity::SemanticError => "error",
            Severity::RuntimeError => "runtime error",
            Severity::MathError => "math warning",
        }
    }
}

/// A diagnostic message with location.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub span: Span,
    pub severity: Severity,
    /// The diagnostic message.
    pub message: Arc<str>,
    /// Optional note pointing at a related declaration.
    pub related: Vec<RelatedInfo>,
}

/// Related information for a diagnostic.
#[derive(Clone, Debug)]
pub struct RelatedInfo {
    pub span: Span,
    pub message: Arc<str>,
}

impl Diagnostic {
    /// Create a new warning diagnostic.
    pub fn warning(span: Span, message: impl Into<Arc<str>>) -> Self {
        Self::new(span, Severity::Warning, message)
    }

    /// Create a new syntax-error diagnostic.
    pub fn syntax_error(span: Span, message: impl Into<Arc<str>>) -> Self {
        Self::new(span, Severity::SyntaxError, message)
    }

    /// Create a new semantic-error diagnostic.
    pub fn error(span: Span, message: impl Into<Arc<str>>) -> Self {
        Self::new(span, Severity::SemanticError, message)
    }

    /// Create a new runtime-error diagnostic.
    pub fn runtime_error(span: Span, message: impl Into<Arc<str>>) -> Self {
        Self::new(span, Severity::RuntimeError, message)
    }

    /// Create a new math-error diagnostic.
    pub fn math_error(span: Span, message: impl Into<Arc<str>>) -> Self {
        Self::new(span, Severity::MathError, message)
    }

    fn new(span: Span, severity: Severity, message: impl Into<Arc<str>>) -> Self {
        Self {
            span,
            severity,
            message: message.into(),
            related: Vec::new(),
        }
    }

    /// Add related information.
    pub fn with_related(mut self, span: Span, message: impl Into<Arc<str>>) -> Self {
        self.related.push(RelatedInfo {
            span,
            message: message.into(),
        });
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}: {}",
            self.span.start,
            self.severity.label(),
            self.message
        )
    }
}

// ============================================================================
// ACCUMULATOR
// ============================================================================

/// Accumulated diagnostics for one program, kept in source-line order.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of diagnostics that block evaluation.
    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|d| d.severity.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.items
            .iter()
            .filter(|d| !d.severity.is_error())
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|d| d.severity.is_error())
    }

    /// Diagnostics sorted by source line for reporting.
    pub fn sorted(&self) -> Vec<&Diagnostic> {
        let mut out: Vec<&Diagnostic> = self.items.iter().collect();
        out.sort_by_key(|d| (d.span.start.line, d.span.start.column));
        out
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(line: u32) -> Span {
        Span::point(line, 1)
    }

    #[test]
    fn error_count_ignores_warnings() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(Diagnostic::warning(span(3), "tag not used"));
        diagnostics.push(Diagnostic::error(span(1), "tag not declared"));
        diagnostics.push(Diagnostic::math_error(span(2), "overflow while folding"));
        assert_eq!(diagnostics.error_count(), 1);
        assert_eq!(diagnostics.warning_count(), 2);
        assert!(diagnostics.has_errors());
    }

    #[test]
    fn sorted_orders_by_line() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(Diagnostic::error(span(5), "late"));
        diagnostics.push(Diagnostic::error(span(2), "early"));
        let sorted = diagnostics.sorted();
        assert_eq!(&*sorted[0].message, "early");
        assert_eq!(&*sorted[1].message, "late");
    }
}
