//! Terminal emitter.
//!
//! Human-readable diagnostic output with optional ANSI color support, for
//! editor-adjacent tooling and test drivers. The library itself never
//! prints.

use std::io::Write;

use crate::{Diagnostic, Severity};

mod colors {
    pub const ERROR: &str = "\x1b[1;31m";
    pub const WARNING: &str = "\x1b[1;33m";
    pub const BOLD: &str = "\x1b[1m";
    pub const RESET: &str = "\x1b[0m";
}

/// Terminal emitter with optional color support.
pub struct TerminalEmitter<W: Write> {
    writer: W,
    colors: bool,
}

impl<W: Write> TerminalEmitter<W> {
    pub fn new(writer: W, colors: bool) -> Self {
        TerminalEmitter { writer, colors }
    }

    /// Emit one diagnostic as `severity[code]: message` with its span and,
    /// when source is available, the offending line.
    pub fn emit(&mut self, diagnostic: &Diagnostic, source: Option<&str>) {
        self.write_severity(diagnostic.severity);
        if self.colors {
            let _ = write!(
                self.writer,
                "{}[{}]{}",
                colors::BOLD,
                diagnostic.code,
                colors::RESET
            );
        } else {
            let _ = write!(self.writer, "[{}]", diagnostic.code);
        }
        let _ = writeln!(self.writer, ": {}", diagnostic.message);
        let _ = writeln!(self.writer, "  --> {:?}", diagnostic.span);

        if let Some(source) = source {
            if let Some((line_no, line)) = line_at(source, diagnostic.span.start as usize) {
                let _ = writeln!(self.writer, "   {line_no} | {line}");
            }
        }
        let _ = writeln!(self.writer);
    }

    /// Emit a batch, e.g. the error list from a metadata pass.
    pub fn emit_all(&mut self, diagnostics: &[Diagnostic], source: Option<&str>) {
        for diagnostic in diagnostics {
            self.emit(diagnostic, source);
        }
    }

    pub fn flush(&mut self) {
        let _ = self.writer.flush();
    }

    fn write_severity(&mut self, severity: Severity) {
        if self.colors {
            let color = match severity {
                Severity::Error => colors::ERROR,
                Severity::Warning => colors::WARNING,
            };
            let _ = write!(self.writer, "{color}{severity}{}", colors::RESET);
        } else {
            let _ = write!(self.writer, "{severity}");
        }
    }
}

/// Locate the 1-based line containing a byte offset.
fn line_at(source: &str, offset: usize) -> Option<(usize, &str)> {
    let mut offset = offset.min(source.len());
    while offset > 0 && !source.is_char_boundary(offset) {
        offset -= 1;
    }
    let line_no = source[..offset].matches('\n').count() + 1;
    source.lines().nth(line_no - 1).map(|line| (line_no, line))
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use weft_ir::Span;

    #[test]
    fn emits_code_and_source_line() {
        let source = "hello\n{{ oops }}\n";
        let diag = Diagnostic::error(
            ErrorCode::VariableNotDeclared,
            "Variable 'oops' is not declared",
            Span::new(9, 13),
        );

        let mut out = Vec::new();
        let mut emitter = TerminalEmitter::new(&mut out, false);
        emitter.emit(&diag, Some(source));
        emitter.flush();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("error[variable-not-declared]"));
        assert!(text.contains("{{ oops }}"));
    }

    #[test]
    fn color_mode_adds_ansi_codes() {
        let diag = Diagnostic::error(ErrorCode::InvalidUpdate, "m", Span::new(0, 1));
        let mut out = Vec::new();
        let mut emitter = TerminalEmitter::new(&mut out, true);
        emitter.emit(&diag, None);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\x1b["));
    }
}
