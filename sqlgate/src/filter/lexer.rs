//! Filter tokenizer
//!
//! Besides strings and numbers, the lexer recognizes typed literals: ISO
//! dates and datetimes (`2024-03-01`, `2024-03-01T08:00:00Z`), unquoted guids
//! starting with a digit, and the prefixed forms `date'...'`,
//! `datetime'...'`, `datetimeoffset'...'` and `guid'...'`.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use uuid::Uuid;

use super::error::TranslateError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Ident(String),
    Text(String),
    Int(i64),
    Float(f64),
    DateTime(DateTime<FixedOffset>),
    Date(NaiveDate),
    Guid(Uuid),
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

impl Token {
    /// Short description for error messages
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Ident(s) => format!("'{}'", s),
            TokenKind::Text(_) => "string literal".to_string(),
            TokenKind::Int(n) => n.to_string(),
            TokenKind::Float(n) => n.to_string(),
            TokenKind::DateTime(_) => "datetime literal".to_string(),
            TokenKind::Date(_) => "date literal".to_string(),
            TokenKind::Guid(_) => "guid literal".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::Comma => "','".to_string(),
        }
    }

    /// Case-insensitive keyword test for identifier tokens
    pub fn is_word(&self, word: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(s) if s.eq_ignore_ascii_case(word))
    }
}

/// Tokenized filter plus the byte offset of a `;` terminator, if one was hit
#[derive(Debug, PartialEq)]
pub(crate) struct Lexed {
    pub tokens: Vec<Token>,
    pub terminated_at: Option<usize>,
}

/// Split `input` into tokens, stopping at the first `;` outside a string literal
pub(crate) fn tokenize(input: &str) -> Result<Lexed, TranslateError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let start = i;
        match b {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b';' => {
                return Ok(Lexed {
                    tokens,
                    terminated_at: Some(start),
                })
            }
            b'(' => {
                tokens.push(Token { kind: TokenKind::LParen, position: start });
                i += 1;
            }
            b')' => {
                tokens.push(Token { kind: TokenKind::RParen, position: start });
                i += 1;
            }
            b',' => {
                tokens.push(Token { kind: TokenKind::Comma, position: start });
                i += 1;
            }
            b'\'' => {
                let (text, end) = string_literal(input, start)?;
                tokens.push(Token { kind: TokenKind::Text(text), position: start });
                i = end;
            }
            b'0'..=b'9' if is_typed_run(&input[start..literal_run_end(bytes, start)]) => {
                let end = literal_run_end(bytes, start);
                let kind = unquoted_literal(&input[start..end], start)?;
                tokens.push(Token { kind, position: start });
                i = end;
            }
            b'-' | b'0'..=b'9' => {
                let (kind, end) = number(input, start)?;
                tokens.push(Token { kind, position: start });
                i = end;
            }
            b if b.is_ascii_alphabetic() || b == b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                let word = &input[start..i];
                let kind = match literal_prefix(word) {
                    Some(prefix) if bytes.get(i) == Some(&b'\'') => {
                        let (text, end) = string_literal(input, i)?;
                        i = end;
                        prefixed_literal(prefix, &text, start)?
                    }
                    _ => TokenKind::Ident(word.to_string()),
                };
                tokens.push(Token { kind, position: start });
            }
            _ => {
                let ch = input[start..].chars().next().unwrap_or('?');
                return Err(TranslateError::UnexpectedCharacter { ch, position: start });
            }
        }
    }

    Ok(Lexed {
        tokens,
        terminated_at: None,
    })
}

// `''` inside a literal is an escaped quote.
fn string_literal(input: &str, start: usize) -> Result<(String, usize), TranslateError> {
    let bytes = input.as_bytes();
    let mut value = String::new();
    let mut i = start + 1;
    let mut run_start = i;

    while i < bytes.len() {
        if bytes[i] == b'\'' {
            value.push_str(&input[run_start..i]);
            if bytes.get(i + 1) == Some(&b'\'') {
                value.push('\'');
                i += 2;
                run_start = i;
                continue;
            }
            return Ok((value, i + 1));
        }
        i += 1;
    }

    Err(TranslateError::UnterminatedString { position: start })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LiteralPrefix {
    DateTime,
    Date,
    Guid,
}

fn literal_prefix(word: &str) -> Option<LiteralPrefix> {
    match word.to_ascii_lowercase().as_str() {
        "datetime" | "datetimeoffset" => Some(LiteralPrefix::DateTime),
        "date" => Some(LiteralPrefix::Date),
        "guid" => Some(LiteralPrefix::Guid),
        _ => None,
    }
}

fn prefixed_literal(
    prefix: LiteralPrefix,
    text: &str,
    position: usize,
) -> Result<TokenKind, TranslateError> {
    let parsed = match prefix {
        LiteralPrefix::DateTime => datetime_value(text).map(TokenKind::DateTime),
        LiteralPrefix::Date => date_value(text).map(TokenKind::Date),
        LiteralPrefix::Guid => Uuid::parse_str(text).ok().map(TokenKind::Guid),
    };
    parsed.ok_or_else(|| TranslateError::InvalidLiteral {
        kind: match prefix {
            LiteralPrefix::DateTime => "datetime",
            LiteralPrefix::Date => "date",
            LiteralPrefix::Guid => "guid",
        },
        text: text.to_string(),
        position,
    })
}

// Characters that may appear inside an unquoted date, datetime, or guid.
fn literal_run_end(bytes: &[u8], start: usize) -> usize {
    let mut end = start;
    while end < bytes.len()
        && (bytes[end].is_ascii_alphanumeric() || matches!(bytes[end], b'-' | b':' | b'.' | b'+'))
    {
        end += 1;
    }
    end
}

// A digit-led run with a `-` or `:` is never a plain number.
fn is_typed_run(run: &str) -> bool {
    run.contains(|c: char| c == '-' || c == ':')
}

fn unquoted_literal(text: &str, position: usize) -> Result<TokenKind, TranslateError> {
    date_value(text)
        .map(TokenKind::Date)
        .or_else(|| datetime_value(text).map(TokenKind::DateTime))
        .or_else(|| Uuid::parse_str(text).ok().map(TokenKind::Guid))
        .ok_or_else(|| TranslateError::InvalidLiteral {
            kind: "date, datetime or guid",
            text: text.to_string(),
            position,
        })
}

fn date_value(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

// Datetimes without an offset are taken as UTC.
fn datetime_value(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text).ok().or_else(|| {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|t| t.and_utc().fixed_offset())
    })
}

fn number(input: &str, start: usize) -> Result<(TokenKind, usize), TranslateError> {
    let bytes = input.as_bytes();
    let mut i = start;
    if bytes[i] == b'-' {
        i += 1;
    }
    let digits_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut is_float = false;
    if i < bytes.len() && bytes[i] == b'.' {
        is_float = true;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    // Digits glued to letters (`12abc`) are not a number.
    if i < bytes.len() && (bytes[i].is_ascii_alphabetic() || bytes[i] == b'_') {
        while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
            i += 1;
        }
    }

    let text = &input[start..i];
    let invalid = || TranslateError::InvalidNumber {
        text: text.to_string(),
        position: start,
    };
    if i == digits_start || text.ends_with('.') || text == "-" {
        return match text {
            "-" => Err(TranslateError::UnexpectedCharacter {
                ch: '-',
                position: start,
            }),
            _ => Err(invalid()),
        };
    }

    let kind = if is_float {
        TokenKind::Float(text.parse::<f64>().map_err(|_| invalid())?)
    } else {
        TokenKind::Int(text.parse::<i64>().map_err(|_| invalid())?)
    };
    Ok((kind, i))
}
