/*
 * lexer.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tokenizer for compiled host script text.
//!
//! Text outside `<?tpl ... ?>` regions becomes a single [`TokenKind::Text`]
//! token. Inside a region the usual expression tokens are produced, and the
//! closing `?>` is kept as [`TokenKind::CloseTag`] because it also ends the
//! current statement.

use crate::ast::StrPart;
use crate::error::{TemplateError, TemplateResult};

pub const OPEN_TAG: &str = "<?tpl";
pub const CLOSE_TAG: &str = "?>";

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Text(String),
    CloseTag,
    Variable(String),
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Double-quoted string with `$name` interpolation.
    Template(Vec<StrPart>),
    Punct(Punct),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Colon,
    Question,
    Arrow,
    DoubleArrow,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    DotAssign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Dot,
    Bang,
    EqEq,
    NotEq,
    Identical,
    NotIdentical,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Coalesce,
    Increment,
    Decrement,
}

/// Punctuation, longest spellings first.
const PUNCTUATION: &[(&str, Punct)] = &[
    ("===", Punct::Identical),
    ("!==", Punct::NotIdentical),
    ("==", Punct::EqEq),
    ("!=", Punct::NotEq),
    ("<>", Punct::NotEq),
    ("<=", Punct::Le),
    (">=", Punct::Ge),
    ("&&", Punct::AndAnd),
    ("||", Punct::OrOr),
    ("??", Punct::Coalesce),
    ("++", Punct::Increment),
    ("--", Punct::Decrement),
    ("+=", Punct::PlusAssign),
    ("-=", Punct::MinusAssign),
    ("*=", Punct::StarAssign),
    ("/=", Punct::SlashAssign),
    ("%=", Punct::PercentAssign),
    (".=", Punct::DotAssign),
    ("->", Punct::Arrow),
    ("=>", Punct::DoubleArrow),
    ("(", Punct::LParen),
    (")", Punct::RParen),
    ("{", Punct::LBrace),
    ("}", Punct::RBrace),
    ("[", Punct::LBracket),
    ("]", Punct::RBracket),
    (";", Punct::Semicolon),
    (",", Punct::Comma),
    (":", Punct::Colon),
    ("?", Punct::Question),
    ("=", Punct::Assign),
    ("+", Punct::Plus),
    ("-", Punct::Minus),
    ("*", Punct::Star),
    ("/", Punct::Slash),
    ("%", Punct::Percent),
    (".", Punct::Dot),
    ("!", Punct::Bang),
    ("<", Punct::Lt),
    (">", Punct::Gt),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token in the compiled text.
    pub offset: usize,
}

/// Split compiled text into tokens, ending with [`TokenKind::Eof`].
pub fn tokenize(source: &str) -> TemplateResult<Vec<Token>> {
    Lexer {
        src: source,
        pos: 0,
        tokens: Vec::new(),
    }
    .run()
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn run(mut self) -> TemplateResult<Vec<Token>> {
        while self.pos < self.src.len() {
            self.lex_text();
            if self.pos < self.src.len() {
                self.lex_code()?;
            }
        }
        self.push(TokenKind::Eof, self.src.len());
        Ok(self.tokens)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn push(&mut self, kind: TokenKind, offset: usize) {
        self.tokens.push(Token { kind, offset });
    }

    /// Consume text up to and including the next open tag.
    fn lex_text(&mut self) {
        let rest = self.rest();
        let end = rest.find(OPEN_TAG).unwrap_or(rest.len());
        if end > 0 {
            let text = rest[..end].to_string();
            self.push(TokenKind::Text(text), self.pos);
        }
        self.pos += end;
        if self.pos < self.src.len() {
            self.pos += OPEN_TAG.len();
        }
    }

    /// Tokenize one code region, through its close tag or end of input.
    fn lex_code(&mut self) -> TemplateResult<()> {
        loop {
            self.skip_trivia()?;
            let rest = self.rest();
            if rest.is_empty() {
                return Ok(());
            }
            if rest.starts_with(CLOSE_TAG) {
                self.push(TokenKind::CloseTag, self.pos);
                self.pos += CLOSE_TAG.len();
                if self.rest().starts_with("\r\n") {
                    self.pos += 2;
                } else if self.rest().starts_with('\n') {
                    self.pos += 1;
                }
                return Ok(());
            }
            self.lex_token()?;
        }
    }

    fn skip_trivia(&mut self) -> TemplateResult<()> {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();

            if trimmed.starts_with("//") {
                // Line comments also end at the close tag
                let end = [trimmed.find('\n'), trimmed.find(CLOSE_TAG)]
                    .into_iter()
                    .flatten()
                    .min()
                    .unwrap_or(trimmed.len());
                self.pos += end;
            } else if trimmed.starts_with("/*") {
                let start = self.pos;
                match trimmed[2..].find("*/") {
                    Some(end) => self.pos += end + 4,
                    None => return Err(TemplateError::syntax("unterminated comment", start)),
                }
            } else {
                return Ok(());
            }
        }
    }

    fn lex_token(&mut self) -> TemplateResult<()> {
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Ok(());
        };

        if c == '$' {
            self.pos += 1;
            let name = self.read_ident();
            if name.is_empty() {
                return Err(TemplateError::syntax("expected variable name after '$'", start));
            }
            self.push(TokenKind::Variable(name), start);
        } else if is_ident_start(c) {
            let name = self.read_ident();
            self.push(TokenKind::Ident(name), start);
        } else if c.is_ascii_digit() {
            let kind = self.read_number();
            self.push(kind, start);
        } else if c == '\'' {
            let s = self.read_single_quoted()?;
            self.push(TokenKind::Str(s), start);
        } else if c == '"' {
            let kind = self.read_double_quoted()?;
            self.push(kind, start);
        } else {
            let rest = self.rest();
            let Some((spelling, punct)) = PUNCTUATION.iter().find(|(p, _)| rest.starts_with(*p))
            else {
                return Err(TemplateError::syntax(
                    format!("unexpected character '{}'", c),
                    start,
                ));
            };
            self.pos += spelling.len();
            self.push(TokenKind::Punct(*punct), start);
        }
        Ok(())
    }

    fn read_ident(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        self.src[start..self.pos].to_string()
    }

    fn skip_digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
    }

    fn read_number(&mut self) -> TokenKind {
        let start = self.pos;
        let mut is_float = false;
        self.skip_digits();

        let rest = self.rest();
        if rest.starts_with('.') && rest[1..].starts_with(|c: char| c.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            self.skip_digits();
        }

        let rest = self.rest();
        if rest.starts_with(['e', 'E']) {
            let exponent = rest[1..].trim_start_matches(['+', '-']);
            let sign_len = rest.len() - 1 - exponent.len();
            if sign_len <= 1 && exponent.starts_with(|c: char| c.is_ascii_digit()) {
                is_float = true;
                self.pos += 1 + sign_len;
                self.skip_digits();
            }
        }

        let text = &self.src[start..self.pos];
        if !is_float {
            if let Ok(i) = text.parse::<i64>() {
                return TokenKind::Int(i);
            }
        }
        // Integer literals that overflow become floats
        TokenKind::Float(text.parse::<f64>().unwrap_or(f64::INFINITY))
    }

    fn read_single_quoted(&mut self) -> TemplateResult<String> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(TemplateError::syntax("unterminated string", start));
            };
            self.pos += c.len_utf8();
            match c {
                '\'' => return Ok(out),
                '\\' => match self.peek() {
                    Some(e @ ('\'' | '\\')) => {
                        out.push(e);
                        self.pos += 1;
                    }
                    _ => out.push('\\'),
                },
                _ => out.push(c),
            }
        }
    }

    fn read_double_quoted(&mut self) -> TemplateResult<TokenKind> {
        let start = self.pos;
        self.pos += 1;
        let mut parts = Vec::new();
        let mut buf = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(TemplateError::syntax("unterminated string", start));
            };
            self.pos += c.len_utf8();
            match c {
                '"' => break,
                '\\' => {
                    let escaped = match self.peek() {
                        Some('n') => Some('\n'),
                        Some('t') => Some('\t'),
                        Some('r') => Some('\r'),
                        Some(e @ ('"' | '\\' | '$')) => Some(e),
                        _ => None,
                    };
                    match escaped {
                        Some(e) => {
                            buf.push(e);
                            self.pos += 1;
                        }
                        None => buf.push('\\'),
                    }
                }
                '$' if self.peek().is_some_and(is_ident_start) => {
                    if !buf.is_empty() {
                        parts.push(StrPart::Literal(std::mem::take(&mut buf)));
                    }
                    parts.push(StrPart::Variable(self.read_ident()));
                }
                _ => buf.push(c),
            }
        }

        if parts.is_empty() {
            return Ok(TokenKind::Str(buf));
        }
        if !buf.is_empty() {
            parts.push(StrPart::Literal(buf));
        }
        Ok(TokenKind::Template(parts))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}
