// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::fmt::{self, Debug, Formatter, Write};
use std::sync::Arc;

use anyhow::{bail, Result};

struct SourceInternal {
    file: String,
    contents: String,
    // Byte offset at which each line starts.
    line_starts: Vec<u32>,
}

/// Policy or query text together with its name. Cheap to clone.
#[derive(Clone)]
pub struct Source {
    src: Arc<SourceInternal>,
}

impl PartialEq for Source {
    fn eq(&self, other: &Source) -> bool {
        Arc::ptr_eq(&self.src, &other.src)
    }
}

impl Eq for Source {}

impl Debug for Source {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.src.file.fmt(f)
    }
}

/// A located error raised while lexing or parsing a source.
///
/// Displays as the caret-annotated message; the API layer downcasts to it
/// to report `{file, row, col}`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{rendered}")]
pub struct SourceError {
    pub file: String,
    pub line: u32,
    pub col: u32,
    pub message: String,
    rendered: String,
}

impl Source {
    pub fn from_contents(file: String, contents: String) -> Result<Source> {
        // Offsets and positions are stored as u32.
        let max_size = u32::MAX as usize - 2;
        if contents.len() > max_size {
            bail!("{file} exceeds maximum allowed policy file size {max_size}");
        }
        let line_starts = std::iter::once(0)
            .chain(
                contents
                    .match_indices('\n')
                    .map(|(i, _)| i as u32 + 1),
            )
            .collect();
        Ok(Self {
            src: Arc::new(SourceInternal {
                file,
                contents,
                line_starts,
            }),
        })
    }

    pub fn file(&self) -> &String {
        &self.src.file
    }

    pub fn contents(&self) -> &String {
        &self.src.contents
    }

    /// Text of the 1-based line `line` without its terminator.
    pub fn line(&self, line: u32) -> &str {
        let starts = &self.src.line_starts;
        let Some(&start) = starts.get(line.saturating_sub(1) as usize) else {
            return "";
        };
        let end = starts
            .get(line as usize)
            .map(|&s| s as usize - 1)
            .unwrap_or(self.src.contents.len());
        self.src.contents[start as usize..end].trim_end_matches('\r')
    }

    /// Render `msg` with the offending line and a caret under `col`.
    pub fn message(&self, line: u32, col: u32, kind: &str, msg: &str) -> String {
        let gutter = " ".repeat(line.to_string().len());
        let mut out = String::new();
        let _ = writeln!(out, "--> {}:{line}:{col}", self.src.file);
        let _ = writeln!(out, "{gutter} |");
        let _ = writeln!(out, "{line} | {}", self.line(line));
        let _ = writeln!(
            out,
            "{gutter} | {}^",
            " ".repeat(col.saturating_sub(1) as usize)
        );
        let _ = write!(out, "{kind}: {msg}");
        out
    }

    pub fn error(&self, line: u32, col: u32, msg: &str) -> anyhow::Error {
        anyhow::Error::new(SourceError {
            file: self.src.file.clone(),
            line,
            col,
            message: msg.to_string(),
            rendered: self.message(line, col, "error", msg),
        })
    }
}

#[derive(Clone)]
pub struct Span {
    pub source: Source,
    pub line: u32,
    pub col: u32,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn text(&self) -> &str {
        &self.source.contents()[self.start as usize..self.end as usize]
    }

    pub fn message(&self, kind: &str, msg: &str) -> String {
        self.source.message(self.line, self.col, kind, msg)
    }

    pub fn error(&self, msg: &str) -> anyhow::Error {
        self.source.error(self.line, self.col, msg)
    }
}

impl Debug for Span {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{} {:?}", self.source.file(), self.line, self.col, self.text())
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum TokenKind {
    /// Punctuation or an operator from `SYMBOLS`.
    Symbol,
    /// A double-quoted string. The span covers the text between the quotes.
    String,
    Number,
    Ident,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token(pub TokenKind, pub Span);

// Longest first so that `:-` wins over `:`.
const SYMBOLS: [&str; 17] = [
    ":-", "!=", "<=", ">=", "<", ">", "=", ":", ",", ";", ".", "[", "]", "{", "}", "(", ")",
];

/// Splits a module or query into tokens. Whitespace, newlines and `#`
/// comments separate tokens and are otherwise dropped; rules are delimited
/// by the grammar, optionally with `;`.
#[derive(Clone)]
pub struct Lexer<'source> {
    source: Source,
    text: &'source str,
    pos: usize,
    line: u32,
    col: u32,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source Source) -> Self {
        Self {
            source: source.clone(),
            text: source.contents(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn rest(&self) -> &'source str {
        &self.text[self.pos..]
    }

    fn current(&self) -> Option<char> {
        self.rest().chars().next()
    }

    // Consume `ch`, which must be the current character of a single line.
    fn bump(&mut self, ch: char) {
        self.pos += ch.len_utf8();
        self.col += 1;
    }

    fn bump_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(ch) = self.current().filter(|c| pred(*c)) {
            self.bump(ch);
        }
    }

    fn token(&self, kind: TokenKind, line: u32, col: u32, start: usize, end: usize) -> Token {
        Token(
            kind,
            Span {
                source: self.source.clone(),
                line,
                col,
                start: start as u32,
                end: end as u32,
            },
        )
    }

    fn skip_trivia(&mut self) {
        while let Some(ch) = self.current() {
            match ch {
                '\n' => {
                    self.pos += 1;
                    self.line += 1;
                    self.col = 1;
                }
                ' ' | '\t' | '\r' => self.bump(ch),
                '#' => self.bump_while(|c| c != '\n'),
                _ => break,
            }
        }
    }

    // -?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?
    fn read_number(&mut self) -> Result<Token> {
        let (start, col) = (self.pos, self.col);
        if self.rest().starts_with('-') {
            self.bump('-');
        }
        if self.rest().starts_with('0') {
            self.bump('0');
        } else {
            self.bump_while(|c| c.is_ascii_digit());
        }

        let mut chars = self.rest().chars();
        if chars.next() == Some('.') && chars.next().is_some_and(|c| c.is_ascii_digit()) {
            self.bump('.');
            self.bump_while(|c| c.is_ascii_digit());
        }

        if let Some(e @ ('e' | 'E')) = self.current() {
            self.bump(e);
            if let Some(sign @ ('+' | '-')) = self.current() {
                self.bump(sign);
            }
            let digits = self.pos;
            self.bump_while(|c| c.is_ascii_digit());
            if self.pos == digits {
                return Err(self.source.error(self.line, self.col, "missing exponent digits"));
            }
        }

        if matches!(self.current(), Some(c) if c == '.' || c == '_' || c.is_ascii_alphanumeric()) {
            return Err(self.source.error(self.line, self.col, "invalid number"));
        }
        Ok(self.token(TokenKind::Number, self.line, col, start, self.pos))
    }

    fn read_string(&mut self) -> Result<Token> {
        let (line, col) = (self.line, self.col);
        self.bump('"');
        let start = self.pos;
        loop {
            let Some(ch) = self.current() else {
                return Err(self.source.error(line, col, "unmatched \""));
            };
            match ch {
                '"' => break,
                '\\' => {
                    self.bump(ch);
                    match self.current() {
                        Some(c @ ('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't')) => self.bump(c),
                        Some('u') => {
                            self.bump('u');
                            for _ in 0..4 {
                                match self.current() {
                                    Some(h) if h.is_ascii_hexdigit() => self.bump(h),
                                    _ => {
                                        return Err(self.source.error(
                                            self.line,
                                            self.col,
                                            "invalid hex escape sequence",
                                        ))
                                    }
                                }
                            }
                        }
                        _ => {
                            return Err(self.source.error(
                                self.line,
                                self.col,
                                "invalid escape sequence",
                            ))
                        }
                    }
                }
                c if c < ' ' => {
                    return Err(self.source.error(
                        self.line,
                        self.col,
                        "invalid character in string",
                    ))
                }
                c => self.bump(c),
            }
        }
        let end = self.pos;
        self.bump('"');
        Ok(self.token(TokenKind::String, line, col + 1, start, end))
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_trivia();
        let (start, line, col) = (self.pos, self.line, self.col);
        let rest = self.rest();
        let Some(ch) = rest.chars().next() else {
            return Ok(self.token(TokenKind::Eof, line, col, start, start));
        };

        // A `-` directly before a digit starts a negative number.
        let negative = ch == '-' && rest[1..].starts_with(|c: char| c.is_ascii_digit());
        if ch.is_ascii_digit() || negative {
            return self.read_number();
        }
        if ch == '"' {
            return self.read_string();
        }
        if ch.is_ascii_alphabetic() || ch == '_' {
            self.bump_while(|c| c.is_ascii_alphanumeric() || c == '_');
            return Ok(self.token(TokenKind::Ident, line, col, start, self.pos));
        }
        if let Some(sym) = SYMBOLS.iter().find(|sym| rest.starts_with(**sym)) {
            for c in sym.chars() {
                self.bump(c);
            }
            return Ok(self.token(TokenKind::Symbol, line, col, start, self.pos));
        }
        Err(self.source.error(line, col, "invalid character"))
    }
}
