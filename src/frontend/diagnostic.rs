use serde::Serialize;

use super::ast::Span;

pub const P_UNRESOLVED_IDENTIFIER: &str = "P004";
pub const P_UNRESOLVED_TYPE: &str = "P005";
pub const P_TYPE_MISMATCH: &str = "P019";
pub const P_MISSING_VARIABLE: &str = "P051";
pub const P_REGISTER_EXHAUSTED: &str = "P052";
pub const P_INVALID_BREAK_CONTINUE: &str = "P081";
pub const P_INTRINSIC_ARITY: &str = "P091";
pub const C_INVALID_CAST: &str = "C073";
pub const X_UNSUPPORTED: &str = "X000";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Clone, Debug, Serialize)]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
    pub span: Option<Span>,
    pub notes: Vec<String>,
    pub help: Option<String>,
    pub severity: Severity,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            code: X_UNSUPPORTED.to_string(),
            message: message.into(),
            span,
            notes: Vec::new(),
            help: None,
            severity: Severity::Error,
        }
    }

    pub fn code(mut self, code: &str) -> Self {
        self.code = code.to_string();
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn warning(mut self) -> Self {
        self.severity = Severity::Warning;
        self
    }
}

/// Accumulating compile result. Every pass appends coded messages in
/// emission order; any error message marks the whole result failed and the
/// pipeline stops at the next phase boundary.
#[derive(Default, Serialize)]
pub struct Diagnostics {
    pub items: Vec<Diagnostic>,
    failed: bool,
}

impl Diagnostics {
    pub fn push_diag(&mut self, diag: Diagnostic) {
        if diag.severity == Severity::Error {
            self.failed = true;
        }
        self.items.push(diag);
    }

    pub fn error(&mut self, code: &str, message: impl Into<String>, span: Option<Span>) {
        self.push_diag(Diagnostic::new(message, span).code(code));
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.items.iter().any(|d| d.code == code)
    }

    pub fn find_code(&self, code: &str) -> Option<&Diagnostic> {
        self.items.iter().find(|d| d.code == code)
    }
}

pub fn format_diagnostic(diag: &Diagnostic) -> String {
    let mut out = match &diag.span {
        Some(span) => format!(
            "{}:{}:{}: {}",
            diag.code, span.line, span.column, diag.message
        ),
        None => format!("{}: {}", diag.code, diag.message),
    };
    for note in &diag.notes {
        out.push_str("\n  note: ");
        out.push_str(note);
    }
    if let Some(help) = &diag.help {
        out.push_str("\n  help: ");
        out.push_str(help);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_marks_result_failed() {
        let mut diags = Diagnostics::default();
        assert!(!diags.is_failed());
        diags.error(P_TYPE_MISMATCH, "type mismatch", None);
        assert!(diags.is_failed());
        assert!(diags.has_code(P_TYPE_MISMATCH));
    }

    #[test]
    fn warnings_do_not_fail() {
        let mut diags = Diagnostics::default();
        diags.push_diag(Diagnostic::new("suspicious cast", None).code(C_INVALID_CAST).warning());
        assert!(!diags.is_failed());
    }

    #[test]
    fn formats_code_and_location() {
        let d = Diagnostic::new("unknown identifier `foo`", Some(Span::new(3, 7)))
            .code(P_UNRESOLVED_IDENTIFIER)
            .help("did you mean `food`?");
        let rendered = format_diagnostic(&d);
        assert!(rendered.starts_with("P004:3:7:"));
        assert!(rendered.contains("help: did you mean"));
    }

    #[test]
    fn serializes_to_json() {
        let d = Diagnostic::new("x", None).code(P_UNRESOLVED_TYPE);
        let text = serde_json::to_string(&d).expect("serialize");
        assert!(text.contains("\"P005\""));
    }
}
