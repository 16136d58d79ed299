//! Placeholder translation.
//!
//! Queries are written in one of five placeholder styles and rewritten to the
//! server's `$n` markers before Parse. Quoted literals, quoted identifiers
//! and comments are copied through untouched.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{Error, Result};
use crate::types::Value;

/// Placeholder syntax of query templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ParamStyle {
    /// `WHERE a = ?`
    Qmark,
    /// `WHERE a = :1`
    Numeric,
    /// `WHERE a = :name`
    Named,
    /// `WHERE a = %s`
    #[default]
    Format,
    /// `WHERE a = %(name)s`
    Pyformat,
}

impl ParamStyle {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Qmark,
            1 => Self::Numeric,
            2 => Self::Named,
            4 => Self::Pyformat,
            _ => Self::Format,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Qmark => "qmark",
            Self::Numeric => "numeric",
            Self::Named => "named",
            Self::Format => "format",
            Self::Pyformat => "pyformat",
        }
    }

    fn is_named(self) -> bool {
        matches!(self, Self::Named | Self::Pyformat)
    }

    fn is_printf(self) -> bool {
        matches!(self, Self::Format | Self::Pyformat)
    }
}

impl FromStr for ParamStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "qmark" => Ok(Self::Qmark),
            "numeric" => Ok(Self::Numeric),
            "named" => Ok(Self::Named),
            "format" => Ok(Self::Format),
            "pyformat" => Ok(Self::Pyformat),
            _ => Err(Error::InvalidUsage(format!(
                "Invalid paramstyle: expected one of ['qmark', 'numeric', 'named', 'format', 'pyformat'], got {s}"
            ))),
        }
    }
}

static PARAMSTYLE: AtomicU8 = AtomicU8::new(ParamStyle::Format as u8);

/// Set the process-wide placeholder style. Connections whose
/// [`Opts::paramstyle`](crate::Opts::paramstyle) is set ignore it.
pub fn set_paramstyle(style: ParamStyle) {
    PARAMSTYLE.store(style as u8, Ordering::Relaxed);
}

/// Current process-wide placeholder style.
pub fn paramstyle() -> ParamStyle {
    ParamStyle::from_u8(PARAMSTYLE.load(Ordering::Relaxed))
}

/// Arguments for one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    /// No arguments: the query is sent as written
    #[default]
    None,
    Positional(Vec<Value>),
    Named(HashMap<String, Value>),
}

impl Params {
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Params::Positional(values.into_iter().map(Into::into).collect())
    }

    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Params::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Params::None)
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Params::None
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }
}

impl<V: Into<Value>, const N: usize> From<[V; N]> for Params {
    fn from(values: [V; N]) -> Self {
        Params::positional(values)
    }
}

impl From<HashMap<String, Value>> for Params {
    fn from(map: HashMap<String, Value>) -> Self {
        Params::Named(map)
    }
}

fn usage(msg: impl Into<String>) -> Error {
    Error::InvalidUsage(msg.into())
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Placeholders found while scanning, in order of appearance.
enum Marker<'q> {
    Next,
    Number(usize),
    Name(&'q str),
}

struct Scanner<'q> {
    query: &'q str,
    bytes: &'q [u8],
    pos: usize,
    out: Vec<u8>,
    style: ParamStyle,
}

impl<'q> Scanner<'q> {
    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    /// Copy a quoted run up to and including `close`. A doubled `close`
    /// continues the run; with `backslash`, `\x` escapes any byte.
    fn copy_quoted(&mut self, close: u8, backslash: bool) {
        self.out.push(self.bytes[self.pos]);
        self.pos += 1;
        while let Some(b) = self.peek_at(0) {
            if backslash && b == b'\\' {
                self.out.push(b);
                if let Some(next) = self.peek_at(1) {
                    self.out.push(next);
                }
                self.pos += 2;
                continue;
            }
            if b == close {
                self.out.push(b);
                self.pos += 1;
                if self.peek_at(0) == Some(close) {
                    self.out.push(close);
                    self.pos += 1;
                    continue;
                }
                return;
            }
            if self.style.is_printf() && b == b'%' && self.peek_at(1) == Some(b'%') {
                self.out.push(b'%');
                self.pos += 2;
                continue;
            }
            self.out.push(b);
            self.pos += 1;
        }
    }

    fn copy_until(&mut self, end: &[u8]) {
        let rest = &self.bytes[self.pos..];
        let len = memchr::memmem::find(rest, end).map_or(rest.len(), |i| i + end.len());
        self.out.extend_from_slice(&rest[..len]);
        self.pos += len;
    }

    fn ident(&mut self) -> &'q str {
        let start = self.pos;
        while self.peek_at(0).is_some_and(is_ident) {
            self.pos += 1;
        }
        let query = self.query;
        &query[start..self.pos]
    }

    /// Is the `'` at `pos` the start of an `E'...'` string?
    fn escape_string(&self) -> bool {
        let Some(prev) = self.pos.checked_sub(1).map(|i| self.bytes[i]) else {
            return false;
        };
        let before = self.pos.checked_sub(2).map(|i| self.bytes[i]);
        matches!(prev, b'E' | b'e') && !before.is_some_and(is_ident)
    }

    /// Next placeholder, copying everything before it to `out`.
    fn next_marker(&mut self) -> Result<Option<Marker<'q>>> {
        while let Some(b) = self.peek_at(0) {
            match (b, self.peek_at(1)) {
                (b'\'', _) => {
                    let backslash = self.escape_string();
                    self.copy_quoted(b'\'', backslash);
                }
                (b'"', _) => self.copy_quoted(b'"', false),
                (b'-', Some(b'-')) => self.copy_until(b"\n"),
                (b'/', Some(b'*')) => self.copy_until(b"*/"),
                (b':', Some(b':')) => {
                    self.out.extend_from_slice(b"::");
                    self.pos += 2;
                }
                (b':', Some(next))
                    if self.style == ParamStyle::Numeric && next.is_ascii_digit() =>
                {
                    self.pos += 1;
                    let digits = self.ident();
                    let n = digits
                        .parse()
                        .map_err(|_| usage(format!("invalid placeholder :{digits}")))?;
                    return Ok(Some(Marker::Number(n)));
                }
                (b':', Some(next)) if self.style == ParamStyle::Named && is_ident_start(next) => {
                    self.pos += 1;
                    return Ok(Some(Marker::Name(self.ident())));
                }
                (b'?', _) if self.style == ParamStyle::Qmark => {
                    self.pos += 1;
                    return Ok(Some(Marker::Next));
                }
                (b'%', next) if self.style.is_printf() => match (self.style, next) {
                    (_, Some(b'%')) => {
                        self.out.push(b'%');
                        self.pos += 2;
                    }
                    (ParamStyle::Format, Some(b's')) => {
                        self.pos += 2;
                        return Ok(Some(Marker::Next));
                    }
                    (ParamStyle::Pyformat, Some(b'(')) => {
                        let start = self.pos + 2;
                        let close = memchr::memchr(b')', &self.bytes[start..])
                            .map(|i| start + i)
                            .ok_or_else(|| usage("unterminated %(name)s placeholder"))?;
                        if self.bytes.get(close + 1) != Some(&b's') {
                            return Err(usage("only %(name)s placeholders are supported"));
                        }
                        self.pos = close + 2;
                        let query = self.query;
                        return Ok(Some(Marker::Name(&query[start..close])));
                    }
                    _ => {
                        return Err(usage(format!(
                            "unsupported placeholder at byte {} for paramstyle {}",
                            self.pos,
                            self.style.as_str()
                        )));
                    }
                },
                _ => {
                    self.out.push(b);
                    self.pos += 1;
                }
            }
        }
        Ok(None)
    }

    fn push_ref(&mut self, n: usize) {
        self.out.push(b'$');
        self.out.extend_from_slice(n.to_string().as_bytes());
    }
}

/// Rewrite `query` to `$n` markers and order the arguments to match.
///
/// With [`Params::None`] the query is returned unchanged. Nothing is
/// returned unless the whole query translated.
pub fn translate(query: &str, style: ParamStyle, params: &Params) -> Result<(String, Vec<Value>)> {
    let (positional, named) = match params {
        Params::None => return Ok((query.to_string(), Vec::new())),
        Params::Positional(_) if style.is_named() => {
            return Err(usage(format!(
                "paramstyle {} takes a mapping, got a sequence",
                style.as_str()
            )));
        }
        Params::Named(_) if !style.is_named() => {
            return Err(usage(format!(
                "paramstyle {} takes a sequence, got a mapping",
                style.as_str()
            )));
        }
        Params::Positional(values) => (values.as_slice(), None),
        Params::Named(map) => (&[][..], Some(map)),
    };

    let mut scanner = Scanner {
        query,
        bytes: query.as_bytes(),
        pos: 0,
        out: Vec::with_capacity(query.len() + 8),
        style,
    };
    let mut next = 0;
    let mut highest = 0;
    let mut names: Vec<&str> = Vec::new();
    let mut values = Vec::new();

    while let Some(marker) = scanner.next_marker()? {
        let n = match marker {
            Marker::Next => {
                next += 1;
                next
            }
            Marker::Number(0) => return Err(usage("placeholder :0 is not valid")),
            Marker::Number(n) => {
                highest = highest.max(n);
                n
            }
            Marker::Name(name) => match names.iter().position(|seen| *seen == name) {
                Some(i) => i + 1,
                None => {
                    let map = named.ok_or_else(|| usage("named placeholder without a mapping"))?;
                    let value = map
                        .get(name)
                        .ok_or_else(|| usage(format!("no value for placeholder {name:?}")))?;
                    names.push(name);
                    values.push(value.clone());
                    names.len()
                }
            },
        };
        scanner.push_ref(n);
    }

    let expected = next.max(highest);
    if named.is_none() {
        if positional.len() != expected {
            return Err(usage(format!(
                "query has {expected} placeholders but {} values were supplied",
                positional.len()
            )));
        }
        values = positional.to_vec();
    }

    let query = String::from_utf8(scanner.out)
        .map_err(|e| usage(format!("query is not valid UTF-8 after translation: {e}")))?;
    Ok((query, values))
}
