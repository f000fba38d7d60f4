//! Hand-written lexer.
//!
//! Two quirks of the grammar live here:
//!
//! - The TYPE/ID split: an identifier that names a registered type lexes as
//!   [`Tok::Type`], so the lexer consults the registry.
//! - `/` starts a regex literal only in expression-head position; after a
//!   value token it is division. The lexer tracks the previous token to pick.
//!
//! Numeric literals keep their raw text: the parser folds an adjacent unary
//! minus into the literal before converting, so `-2147483648` parses.

use crate::{
    ast::BinOp,
    error::{CompileError, Loc},
    registry::Registry,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    /// Raw numeric literal text, including radix prefix and width suffix.
    Numeric(Box<str>),
    Str(Box<str>),
    Regex { pattern: Box<str>, flags: Box<str> },
    True,
    False,
    Null,
    Id(Box<str>),
    /// An identifier that names a registered type.
    Type(Box<str>),

    If,
    Else,
    While,
    Do,
    For,
    In,
    Continue,
    Break,
    Return,
    New,
    Try,
    Catch,
    Throw,
    Instanceof,

    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Dot,
    Question,
    Colon,
    ColonColon,
    Arrow,

    /// `=` when `None`, else a compound assignment like `+=`.
    Assign(Option<BinOp>),
    Incr,
    Decr,

    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    FindOp,
    MatchOp,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Not,
    BitNot,
    AndAnd,
    OrOr,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,
    Ushr,

    Eof,
}

impl Tok {
    /// True when a following `/` must be division rather than a regex start.
    fn ends_value(&self) -> bool {
        matches!(
            self,
            Self::Numeric(_)
                | Self::Str(_)
                | Self::Regex { .. }
                | Self::True
                | Self::False
                | Self::Null
                | Self::Id(_)
                | Self::Type(_)
                | Self::RParen
                | Self::RBracket
                | Self::Incr
                | Self::Decr
        )
    }
}

/// Lexes the whole source into a token stream ending with [`Tok::Eof`].
pub fn lex(source: &str, registry: &Registry) -> Result<Vec<(Tok, Loc)>, CompileError> {
    Lexer::new(source, registry).run()
}

struct Lexer<'a> {
    source: &'a str,
    registry: &'a Registry,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    tokens: Vec<(Tok, Loc)>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str, registry: &'a Registry) -> Self {
        Self {
            source,
            registry,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            tokens: Vec::new(),
        }
    }

    fn loc(&self) -> Loc {
        Loc::new(self.line, u32::try_from(self.pos).unwrap_or(u32::MAX))
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn run(mut self) -> Result<Vec<(Tok, Loc)>, CompileError> {
        loop {
            self.skip_trivia()?;
            let loc = self.loc();
            let Some(b) = self.peek() else {
                self.tokens.push((Tok::Eof, loc));
                return Ok(self.tokens);
            };
            let tok = match b {
                b'0'..=b'9' => self.numeric(),
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.word(),
                b'\'' | b'"' => self.string(loc)?,
                b'/' if !self.tokens.last().is_some_and(|(t, _)| t.ends_value()) => self.regex(loc)?,
                _ => self.operator(loc)?,
            };
            self.tokens.push((tok, loc));
        }
    }

    fn skip_trivia(&mut self) -> Result<(), CompileError> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.bump();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let loc = self.loc();
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some(b'*') if self.eat(b'/') => break,
                            Some(_) => {}
                            None => return Err(CompileError::syntax("unterminated block comment.", loc)),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn numeric(&mut self) -> Tok {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.pos += 2;
            while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            if matches!(self.peek(), Some(b'l' | b'L')) {
                self.pos += 1;
            }
            return Tok::Numeric(self.source[start..self.pos].into());
        }
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        // Fraction only when a digit follows the dot, so `1.toString()` lexes
        // as a chain rather than a malformed number.
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E'))
            && (self.peek_at(1).is_some_and(|b| b.is_ascii_digit())
                || (matches!(self.peek_at(1), Some(b'+' | b'-')) && self.peek_at(2).is_some_and(|b| b.is_ascii_digit())))
        {
            self.pos += 2;
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'l' | b'L' | b'f' | b'F' | b'd' | b'D')) {
            self.pos += 1;
        }
        Tok::Numeric(self.source[start..self.pos].into())
    }

    fn word(&mut self) -> Tok {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_') {
            self.pos += 1;
        }
        let word = &self.source[start..self.pos];
        match word {
            "true" => Tok::True,
            "false" => Tok::False,
            "null" => Tok::Null,
            "if" => Tok::If,
            "else" => Tok::Else,
            "while" => Tok::While,
            "do" => Tok::Do,
            "for" => Tok::For,
            "in" => Tok::In,
            "continue" => Tok::Continue,
            "break" => Tok::Break,
            "return" => Tok::Return,
            "new" => Tok::New,
            "try" => Tok::Try,
            "catch" => Tok::Catch,
            "throw" => Tok::Throw,
            "instanceof" => Tok::Instanceof,
            name if self.registry.is_type_name(name) => Tok::Type(name.into()),
            name => Tok::Id(name.into()),
        }
    }

    fn string(&mut self, loc: Loc) -> Result<Tok, CompileError> {
        let quote = self.bump().expect("string called on a quote");
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(CompileError::syntax("unterminated string literal.", loc)),
                Some(b) if b == quote => break,
                Some(b'\\') => match self.bump() {
                    Some(b'\\') => out.push('\\'),
                    Some(b'\'') => out.push('\''),
                    Some(b'"') => out.push('"'),
                    Some(b'n') => out.push('\n'),
                    Some(b't') => out.push('\t'),
                    Some(b'r') => out.push('\r'),
                    Some(other) => {
                        return Err(CompileError::syntax(
                            format!("unknown escape sequence [\\{}].", char::from(other)),
                            loc,
                        ));
                    }
                    None => return Err(CompileError::syntax("unterminated string literal.", loc)),
                },
                Some(b) if b.is_ascii() => out.push(char::from(b)),
                Some(_) => {
                    // Re-decode the multi-byte char from the source.
                    let char_start = self.pos - 1;
                    let c = self.source[char_start..].chars().next().expect("valid utf-8 source");
                    self.pos = char_start + c.len_utf8();
                    out.push(c);
                }
            }
        }
        Ok(Tok::Str(out.into()))
    }

    fn regex(&mut self, loc: Loc) -> Result<Tok, CompileError> {
        self.bump();
        let start = self.pos;
        loop {
            match self.peek() {
                None | Some(b'\n') => return Err(CompileError::syntax("unterminated regex literal.", loc)),
                Some(b'\\') if self.peek_at(1).is_some() => {
                    self.pos += 2;
                }
                Some(b'/') => break,
                Some(_) => {
                    self.bump();
                }
            }
        }
        let pattern: Box<str> = self.source[start..self.pos].into();
        self.bump();
        let flag_start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        let flags: Box<str> = self.source[flag_start..self.pos].into();
        for flag in flags.chars() {
            if !matches!(flag, 'i' | 'm' | 's' | 'x') {
                return Err(CompileError::syntax(format!("unknown regex flag [{flag}]."), loc));
            }
        }
        Ok(Tok::Regex { pattern, flags })
    }

    fn operator(&mut self, loc: Loc) -> Result<Tok, CompileError> {
        let b = self.bump().expect("operator called on a byte");
        let tok = match b {
            b'{' => Tok::LBrace,
            b'}' => Tok::RBrace,
            b'(' => Tok::LParen,
            b')' => Tok::RParen,
            b'[' => Tok::LBracket,
            b']' => Tok::RBracket,
            b';' => Tok::Semicolon,
            b',' => Tok::Comma,
            b'.' => Tok::Dot,
            b'?' => Tok::Question,
            b':' => {
                if self.eat(b':') {
                    Tok::ColonColon
                } else {
                    Tok::Colon
                }
            }
            b'=' => {
                if self.eat(b'=') {
                    if self.eat(b'~') { Tok::MatchOp } else { Tok::Eq }
                } else if self.eat(b'~') {
                    Tok::FindOp
                } else {
                    Tok::Assign(None)
                }
            }
            b'!' => {
                if self.eat(b'=') {
                    Tok::Ne
                } else {
                    Tok::Not
                }
            }
            b'<' => {
                if self.eat(b'<') {
                    if self.eat(b'=') {
                        Tok::Assign(Some(BinOp::Shl))
                    } else {
                        Tok::Shl
                    }
                } else if self.eat(b'=') {
                    Tok::Le
                } else {
                    Tok::Lt
                }
            }
            b'>' => {
                if self.eat(b'>') {
                    if self.eat(b'>') {
                        if self.eat(b'=') {
                            Tok::Assign(Some(BinOp::Ushr))
                        } else {
                            Tok::Ushr
                        }
                    } else if self.eat(b'=') {
                        Tok::Assign(Some(BinOp::Shr))
                    } else {
                        Tok::Shr
                    }
                } else if self.eat(b'=') {
                    Tok::Ge
                } else {
                    Tok::Gt
                }
            }
            b'+' => {
                if self.eat(b'+') {
                    Tok::Incr
                } else if self.eat(b'=') {
                    Tok::Assign(Some(BinOp::Add))
                } else {
                    Tok::Plus
                }
            }
            b'-' => {
                if self.eat(b'-') {
                    Tok::Decr
                } else if self.eat(b'=') {
                    Tok::Assign(Some(BinOp::Sub))
                } else if self.eat(b'>') {
                    Tok::Arrow
                } else {
                    Tok::Minus
                }
            }
            b'*' => {
                if self.eat(b'=') {
                    Tok::Assign(Some(BinOp::Mul))
                } else {
                    Tok::Star
                }
            }
            b'/' => {
                if self.eat(b'=') {
                    Tok::Assign(Some(BinOp::Div))
                } else {
                    Tok::Slash
                }
            }
            b'%' => {
                if self.eat(b'=') {
                    Tok::Assign(Some(BinOp::Rem))
                } else {
                    Tok::Percent
                }
            }
            b'&' => {
                if self.eat(b'&') {
                    Tok::AndAnd
                } else if self.eat(b'=') {
                    Tok::Assign(Some(BinOp::BitAnd))
                } else {
                    Tok::Amp
                }
            }
            b'|' => {
                if self.eat(b'|') {
                    Tok::OrOr
                } else if self.eat(b'=') {
                    Tok::Assign(Some(BinOp::BitOr))
                } else {
                    Tok::Pipe
                }
            }
            b'^' => {
                if self.eat(b'=') {
                    Tok::Assign(Some(BinOp::BitXor))
                } else {
                    Tok::Caret
                }
            }
            b'~' => Tok::BitNot,
            other => {
                return Err(CompileError::syntax(
                    format!("unexpected character [{}].", char::from(other)),
                    loc,
                ));
            }
        };
        Ok(tok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::catalog::default_registry;

    fn toks(source: &str) -> Vec<Tok> {
        let registry = default_registry().unwrap();
        lex(source, &registry).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_type_vs_id_split() {
        let tokens = toks("int x = y;");
        assert_eq!(
            tokens,
            vec![
                Tok::Type("int".into()),
                Tok::Id("x".into()),
                Tok::Assign(None),
                Tok::Id("y".into()),
                Tok::Semicolon,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_numeric_keeps_raw_text() {
        let tokens = toks("0x1F 12L 1.5f 2d 3e2");
        assert_eq!(
            tokens[..5],
            [
                Tok::Numeric("0x1F".into()),
                Tok::Numeric("12L".into()),
                Tok::Numeric("1.5f".into()),
                Tok::Numeric("2d".into()),
                Tok::Numeric("3e2".into()),
            ]
        );
    }

    #[test]
    fn test_regex_vs_division() {
        let tokens = toks("x / 2");
        assert!(tokens.contains(&Tok::Slash));
        let tokens = toks("x =~ /ab+c/i");
        assert!(tokens.contains(&Tok::Regex {
            pattern: "ab+c".into(),
            flags: "i".into()
        }));
    }

    #[test]
    fn test_shift_and_compare_operators() {
        let tokens = toks("a >>> 2 >= b >> 1 << c");
        assert!(tokens.contains(&Tok::Ushr));
        assert!(tokens.contains(&Tok::Ge));
        assert!(tokens.contains(&Tok::Shr));
        assert!(tokens.contains(&Tok::Shl));
    }

    #[test]
    fn test_funcref_and_lambda_tokens() {
        let tokens = toks("Integer::parseInt x -> y");
        assert!(tokens.contains(&Tok::ColonColon));
        assert!(tokens.contains(&Tok::Arrow));
    }

    #[test]
    fn test_string_escapes() {
        let tokens = toks(r"'a\n\'b'");
        assert_eq!(tokens[0], Tok::Str("a\n'b".into()));
    }

    #[test]
    fn test_unterminated_string_errors() {
        let registry = default_registry().unwrap();
        let err = lex("'abc", &registry).unwrap_err();
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn test_comments_are_trivia() {
        let tokens = toks("1 // line\n/* block\n*/ 2");
        assert_eq!(
            tokens[..2],
            [Tok::Numeric("1".into()), Tok::Numeric("2".into())]
        );
    }
}
