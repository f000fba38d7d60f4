//! Compile-time diagnostics.
//!
//! Every failure surfaced during lexing, parsing, analysis, or registry
//! construction is a [`CompileError`] carrying a category, a message, and a
//! source location. The emitter never produces script-level errors; anything
//! it cannot handle is an internal fault (see [`CompileError::illegal_tree`]).

use std::{
    borrow::Cow,
    fmt::{self, Write},
};

use strum::{Display, IntoStaticStr};

/// A position in the script source: 1-based line plus byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Loc {
    /// 1-based line number.
    pub line: u32,
    /// Byte offset from the start of the source.
    pub offset: u32,
}

impl Loc {
    #[must_use]
    pub const fn new(line: u32, offset: u32) -> Self {
        Self { line, offset }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, offset {}", self.line, self.offset)
    }
}

/// Category of a compile failure.
///
/// Categories, not concrete types: every error is a [`CompileError`] and the
/// kind tells callers (and tests) which family of check rejected the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum ErrorKind {
    /// Raised by the lexer/parser.
    Syntax,
    /// Unknown type, member, variable, cast, or a non-functional interface target.
    Resolution,
    /// Incompatible types, read-only assignment, non-statement in statement position.
    Type,
    /// Unreachable statement, break/continue outside a loop, missing return.
    ControlFlow,
    /// Compile-time folded overflow or division by zero.
    Constant,
    /// Too many slots, constants, or a jump out of encodable range.
    Limit,
    /// Internal compiler fault; not a script error.
    Internal,
}

/// An error produced while turning source text into an executable.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: Cow<'static, str>,
    pub loc: Loc,
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>, loc: Loc) -> Self {
        Self {
            kind,
            message: message.into(),
            loc,
        }
    }

    pub fn syntax(message: impl Into<Cow<'static, str>>, loc: Loc) -> Self {
        Self::new(ErrorKind::Syntax, message, loc)
    }

    pub fn resolution(message: impl Into<Cow<'static, str>>, loc: Loc) -> Self {
        Self::new(ErrorKind::Resolution, message, loc)
    }

    pub fn type_error(message: impl Into<Cow<'static, str>>, loc: Loc) -> Self {
        Self::new(ErrorKind::Type, message, loc)
    }

    pub fn control_flow(message: impl Into<Cow<'static, str>>, loc: Loc) -> Self {
        Self::new(ErrorKind::ControlFlow, message, loc)
    }

    pub fn constant(message: impl Into<Cow<'static, str>>, loc: Loc) -> Self {
        Self::new(ErrorKind::Constant, message, loc)
    }

    pub fn limit(message: impl Into<Cow<'static, str>>, loc: Loc) -> Self {
        Self::new(ErrorKind::Limit, message, loc)
    }

    /// An emitter fault: analysis let an impossible tree through.
    pub fn illegal_tree(loc: Loc) -> Self {
        Self::new(ErrorKind::Internal, "Illegal tree structure.", loc)
    }

    /// Renders the error with an excerpt of the source around the location.
    ///
    /// The excerpt is the full line the error points at, with a caret column
    /// when the offset falls inside the line.
    #[must_use]
    pub fn render(&self, source: &str) -> String {
        let mut out = format!("{self}");
        if let Some((line_start, line_text)) = line_around(source, self.loc.offset as usize) {
            let _ = write!(out, "\n{line_text}");
            let col = (self.loc.offset as usize).saturating_sub(line_start);
            if col <= line_text.len() {
                let _ = write!(out, "\n{:>width$}", "^", width = col + 1);
            }
        }
        out
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error at {}: {}", self.kind, self.loc, self.message)
    }
}

impl std::error::Error for CompileError {}

/// Finds the line containing `offset`, returning its start offset and text.
fn line_around(source: &str, offset: usize) -> Option<(usize, &str)> {
    if offset > source.len() {
        return None;
    }
    let start = source[..offset].rfind('\n').map_or(0, |i| i + 1);
    let end = source[offset..].find('\n').map_or(source.len(), |i| offset + i);
    Some((start, &source[start..end]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_kind_and_line() {
        let err = CompileError::type_error("Cannot cast from [int] to [bool].", Loc::new(3, 40));
        let rendered = err.to_string();
        assert!(rendered.contains("Type error"));
        assert!(rendered.contains("line 3"));
        assert!(rendered.contains("Cannot cast"));
    }

    #[test]
    fn test_render_excerpt_with_caret() {
        let source = "int x = 1;\nint y = true;\n";
        // offset of `true`
        let offset = source.find("true").unwrap() as u32;
        let err = CompileError::type_error("Cannot cast from [bool] to [int].", Loc::new(2, offset));
        let rendered = err.render(source);
        assert!(rendered.contains("int y = true;"));
        assert!(rendered.lines().last().unwrap().trim_end().ends_with('^'));
    }

    #[test]
    fn test_render_offset_past_end() {
        let err = CompileError::syntax("unexpected end of script.", Loc::new(1, 999));
        // No panic, no excerpt.
        assert_eq!(err.render("x"), err.to_string());
    }
}
