//! Error types for the Sable runtime.
//!
//! Every fallible operation across the workspace returns [`Result`]. An
//! [`Error`] pairs a classification ([`ErrorKind`]) with a message, an
//! optional source location and the traceback accumulated while the error
//! unwound through the VM call stack.

use std::fmt;

use thiserror::Error;

/// Classification of a runtime failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed source text: lexer or parser rejection, or a structurally
    /// invalid construct caught by the compiler (e.g. vararg expansion not in
    /// final position of a table constructor).
    Syntax,

    /// Well-formed but invalid program: assignment to a `const`, `break`
    /// outside a loop, and similar.
    Semantic,

    /// A name could not be resolved.
    Reference,

    /// Mismatched operand types: arithmetic on non-numbers, indexing a
    /// non-table without a metamethod, calling a non-callable, bad argument
    /// to a host function.
    Type,

    /// Any other runtime failure: register overflow at compile time, userdata
    /// tag mismatch, script-raised `error()`.
    Runtime,
}

impl ErrorKind {
    /// Human-readable name used as the message prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Semantic => "semantic error",
            ErrorKind::Reference => "reference error",
            ErrorKind::Type => "type error",
            ErrorKind::Runtime => "runtime error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A position in a source file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceLocation {
    /// Name of the chunk or file the error originated in.
    pub source: String,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

impl SourceLocation {
    /// Creates a location from a chunk name and position.
    pub fn new(source: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            source: source.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source, self.line, self.column)
    }
}

/// One frame of a stack traceback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// Chunk name of the frame's function.
    pub source: String,
    /// Line of the instruction that was executing.
    pub line: u32,
    /// Function name, or `?` for anonymous and host frames.
    pub function: String,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: in function '{}'",
            self.source, self.line, self.function
        )
    }
}

fn render(
    kind: &ErrorKind,
    message: &str,
    location: &Option<SourceLocation>,
    traceback: &[TraceFrame],
) -> String {
    let mut out = String::new();
    if let Some(loc) = location {
        out.push_str(&format!("{loc}: "));
    }
    out.push_str(&format!("{kind}: {message}"));
    for frame in traceback {
        out.push('\n');
        out.push_str(&format!("\t{frame}"));
    }
    out
}

/// A failure raised by the parser, the compiler or the VM.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", render(.kind, .message, .location, .traceback))]
pub struct Error {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Where the failure originated, when known.
    pub location: Option<SourceLocation>,
    /// Call frames active when the error unwound, innermost first.
    pub traceback: Vec<TraceFrame>,
}

impl Error {
    /// Creates an error with no location.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
            traceback: Vec::new(),
        }
    }

    /// Creates an error at a known location.
    pub fn at(kind: ErrorKind, message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            kind,
            message: message.into(),
            location: Some(location),
            traceback: Vec::new(),
        }
    }

    /// Shorthand for a [`ErrorKind::Syntax`] error.
    pub fn syntax(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::at(ErrorKind::Syntax, message, location)
    }

    /// Shorthand for a [`ErrorKind::Semantic`] error.
    pub fn semantic(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::at(ErrorKind::Semantic, message, location)
    }

    /// Shorthand for a [`ErrorKind::Reference`] error.
    pub fn reference(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::at(ErrorKind::Reference, message, location)
    }

    /// Shorthand for a [`ErrorKind::Type`] error with a location.
    pub fn type_error(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::at(ErrorKind::Type, message, location)
    }

    /// Shorthand for a [`ErrorKind::Type`] error with no location (host API).
    pub fn type_error_msg(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    /// Shorthand for a [`ErrorKind::Runtime`] error with a location.
    pub fn runtime(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::at(ErrorKind::Runtime, message, location)
    }

    /// Shorthand for a [`ErrorKind::Runtime`] error with no location.
    pub fn runtime_msg(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    /// Appends a frame to the traceback. The VM calls this for each call
    /// frame unwound at the host boundary, innermost first.
    pub fn push_trace_frame(&mut self, frame: TraceFrame) {
        self.traceback.push(frame);
    }

    /// Replaces the location if none was recorded yet. Keeps the innermost
    /// location when an error crosses several frames.
    pub fn or_location(mut self, location: SourceLocation) -> Self {
        if self.location.is_none() {
            self.location = Some(location);
        }
        self
    }
}

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_location_and_kind() {
        let err = Error::type_error(
            "attempt to call a nil value",
            SourceLocation::new("main.sbl", 3, 9),
        );
        assert_eq!(
            err.to_string(),
            "main.sbl:3:9: type error: attempt to call a nil value"
        );
    }

    #[test]
    fn display_appends_traceback_frames() {
        let mut err = Error::runtime_msg("boom");
        err.push_trace_frame(TraceFrame {
            source: "main.sbl".into(),
            line: 12,
            function: "inner".into(),
        });
        err.push_trace_frame(TraceFrame {
            source: "main.sbl".into(),
            line: 30,
            function: "main chunk".into(),
        });
        let text = err.to_string();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("runtime error: boom"));
        assert_eq!(
            lines.next(),
            Some("\tmain.sbl:12: in function 'inner'")
        );
        assert_eq!(
            lines.next(),
            Some("\tmain.sbl:30: in function 'main chunk'")
        );
    }

    #[test]
    fn or_location_keeps_innermost() {
        let err = Error::type_error("bad", SourceLocation::new("a.sbl", 1, 1))
            .or_location(SourceLocation::new("b.sbl", 2, 2));
        assert_eq!(err.location.as_ref().map(|l| l.source.as_str()), Some("a.sbl"));
    }
}
