//! Compile-time diagnostic collection, built on `codespan-reporting` the
//! way `raya-checker`'s `Diagnostic` wraps it.

use codespan_reporting::diagnostic::{Diagnostic as CsDiagnostic, Label, Severity as CsSeverity};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{Buffer, ColorChoice, StandardStream};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl From<Severity> for CsSeverity {
    fn from(value: Severity) -> Self {
        match value {
            Severity::Error => CsSeverity::Error,
            Severity::Warning => CsSeverity::Warning,
            Severity::Note => CsSeverity::Note,
        }
    }
}

/// A stable, human-greppable error code, e.g. `"E0100"` or `"undefined-variable"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub &'static str);

/// One compiler-reported diagnostic: a severity, a stable code, a primary
/// label over a byte span, and any number of secondary labels/notes.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<ErrorCode>,
    pub message: String,
    pub primary_span: Range<usize>,
    pub primary_label: String,
    pub secondary: Vec<(Range<usize>, String)>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>, span: Range<usize>) -> Self {
        Diagnostic {
            severity,
            code: None,
            message: message.into(),
            primary_span: span,
            primary_label: String::new(),
            secondary: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>, span: Range<usize>) -> Self {
        Self::new(Severity::Error, message, span)
    }

    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_primary_label(mut self, label: impl Into<String>) -> Self {
        self.primary_label = label.into();
        self
    }

    pub fn with_secondary_label(mut self, span: Range<usize>, label: impl Into<String>) -> Self {
        self.secondary.push((span, label.into()));
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    fn to_codespan(&self, file_id: usize) -> CsDiagnostic<usize> {
        let mut diag = CsDiagnostic::new(self.severity.into()).with_message(&self.message);
        if let Some(code) = self.code {
            diag = diag.with_code(code.0);
        }
        let mut labels = vec![Label::primary(file_id, self.primary_span.clone())
            .with_message(self.primary_label.clone())];
        for (span, msg) in &self.secondary {
            labels.push(Label::secondary(file_id, span.clone()).with_message(msg.clone()));
        }
        diag = diag.with_labels(labels);
        if !self.notes.is_empty() {
            diag = diag.with_notes(self.notes.clone());
        }
        diag
    }
}

/// Accumulates diagnostics for a single compilation; replaces the `hadError`
/// boolean-plus-continue pattern with an explicit collector that downstream
/// code consults per-statement.
#[derive(Debug, Default)]
pub struct DiagnosticCollector {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    /// Renders every diagnostic against `source` (named `file_name`) to an
    /// in-memory buffer, for tests that want to assert on rendered text.
    pub fn render_to_string(&self, file_name: &str, source: &str) -> String {
        let mut files = SimpleFiles::new();
        let file_id = files.add(file_name, source);
        let mut buffer = Buffer::no_color();
        let config = term::Config::default();
        for diagnostic in &self.diagnostics {
            let _ = term::emit(&mut buffer, &config, &files, &diagnostic.to_codespan(file_id));
        }
        String::from_utf8_lossy(buffer.as_slice()).into_owned()
    }

    /// Renders every diagnostic to a real terminal stream (used by CLI-style
    /// callers; the core itself never writes to stdout/stderr directly).
    pub fn emit_to_stderr(&self, file_name: &str, source: &str) {
        let mut files = SimpleFiles::new();
        let file_id = files.add(file_name, source);
        let writer = StandardStream::stderr(ColorChoice::Auto);
        let config = term::Config::default();
        let mut handle = writer.lock();
        for diagnostic in &self.diagnostics {
            let _ = term::emit(&mut handle, &config, &files, &diagnostic.to_codespan(file_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_collector_has_no_errors() {
        let collector = DiagnosticCollector::new();
        assert!(!collector.has_errors());
        assert_eq!(collector.error_count(), 0);
    }

    #[test]
    fn pushing_an_error_is_visible() {
        let mut collector = DiagnosticCollector::new();
        collector.push(
            Diagnostic::error("type mismatch in let declaration", 10..20)
                .with_code(ErrorCode("type-mismatch"))
                .with_primary_label("expected i32"),
        );
        assert!(collector.has_errors());
        assert_eq!(collector.error_count(), 1);
    }

    #[test]
    fn warnings_and_notes_do_not_count_as_errors() {
        let mut collector = DiagnosticCollector::new();
        collector.push(Diagnostic::new(Severity::Warning, "promoted to i64", 0..5));
        collector.push(Diagnostic::new(Severity::Note, "see declaration", 0..5));
        assert!(!collector.has_errors());
        assert_eq!(collector.diagnostics().len(), 2);
    }

    #[test]
    fn render_to_string_includes_the_message() {
        let mut collector = DiagnosticCollector::new();
        collector.push(Diagnostic::error("undefined variable 'x'", 0..1));
        let rendered = collector.render_to_string("test.orus", "x");
        assert!(rendered.contains("undefined variable"));
    }
}
