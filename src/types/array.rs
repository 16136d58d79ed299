//! Multi-dimensional arrays.
//!
//! A [`Value::Array`] may nest to any depth; every inner `Array` is one more
//! dimension. Sending one takes two steps: [`array_inspect`] picks the array
//! type from the leaves, then [`ArrayEncoder::encode`] checks the shape and
//! writes the payload.

use std::mem::discriminant;

use crate::error::{Error, Result};
use crate::protocol::codec::{read_i32, read_u32, write_nullable};
use crate::protocol::types::{FormatCode, Oid, oid};

use super::registry::{self, TypeCodec};
use super::{Value, int_oid, utf8};

/// Writes one array value as a given array type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayEncoder {
    pub array_oid: Oid,
    pub element_oid: Oid,
    pub format: FormatCode,
}

fn for_each_leaf<'a>(value: &'a Value, f: &mut impl FnMut(&'a Value)) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| for_each_leaf(item, f)),
        leaf => f(leaf),
    }
}

fn element_codec(element_oid: Oid) -> Result<&'static TypeCodec> {
    registry::lookup(element_oid)
        .ok_or_else(|| Error::ArrayContentNotSupported(format!("oid {element_oid}")))
}

/// Pick the array type for `value` from its first non-null leaf.
///
/// Integer elements take the narrowest width holding every integer leaf.
/// Strings are sent as `text[]` in text format. Shape and homogeneity are
/// checked later, by [`ArrayEncoder::encode`].
pub fn array_inspect(value: &Value) -> Result<(Oid, FormatCode, ArrayEncoder)> {
    let mut first = None;
    let mut int_range = (0_i64, 0_i64);
    for_each_leaf(value, &mut |leaf| {
        if let Value::Int(v) = leaf {
            int_range = (int_range.0.min(*v), int_range.1.max(*v));
        }
        if first.is_none() && !leaf.is_null() {
            first = Some(leaf);
        }
    });
    let first = first.ok_or(Error::ArrayContentEmpty)?;

    let element_oid = match first {
        Value::Int(_) => match (int_oid(int_range.0), int_oid(int_range.1)) {
            (oid::INT8, _) | (_, oid::INT8) => oid::INT8,
            (oid::INT4, _) | (_, oid::INT4) => oid::INT4,
            _ => oid::INT2,
        },
        other => other.type_oid(),
    };
    let codec = element_codec(element_oid)?;
    let array_oid = codec
        .array_oid
        .ok_or_else(|| Error::ArrayContentNotSupported(codec.name.to_string()))?;
    let format = if codec.encode_binary.is_some() {
        FormatCode::Binary
    } else {
        FormatCode::Text
    };
    let element_oid = if element_oid == oid::UNKNOWN {
        oid::TEXT
    } else {
        element_oid
    };
    let encoder = ArrayEncoder {
        array_oid,
        element_oid,
        format,
    };
    Ok((array_oid, format, encoder))
}

/// Length of each dimension, taken from the first element at every level.
fn dimensions(value: &Value) -> Vec<usize> {
    let mut dims = Vec::new();
    let mut current = value;
    while let Value::Array(items) = current {
        dims.push(items.len());
        match items.first() {
            Some(first) => current = first,
            None => break,
        }
    }
    dims
}

fn check_shape(items: &[Value], dims: &[usize]) -> Result<()> {
    let Some((&len, inner)) = dims.split_first() else {
        return Err(Error::ArrayDimensionsNotConsistent);
    };
    if items.len() != len {
        return Err(Error::ArrayDimensionsNotConsistent);
    }
    for item in items {
        match (item, inner.is_empty()) {
            (Value::Array(sub), false) => check_shape(sub, inner)?,
            (Value::Array(_), true) => return Err(Error::ArrayDimensionsNotConsistent),
            // a scalar, or NULL, where a sub-array belongs
            (_, false) => return Err(Error::ArrayDimensionsNotConsistent),
            (_, true) => {}
        }
    }
    Ok(())
}

impl ArrayEncoder {
    /// Check `value` and write its payload.
    ///
    /// Leaves must share one variant (`ArrayContentNotHomogeneous`), and
    /// sibling sub-arrays must have equal lengths at every depth
    /// (`ArrayDimensionsNotConsistent`), in that order.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        let Value::Array(items) = value else {
            return Err(Error::Encode(format!("not an array: {value:?}")));
        };

        let mut kind = None;
        let mut homogeneous = true;
        let mut has_null = false;
        for_each_leaf(value, &mut |leaf| match leaf {
            Value::Null => has_null = true,
            Value::Unknown { oid, .. } => {
                let this = (discriminant(leaf), *oid);
                homogeneous &= *kind.get_or_insert(this) == this;
            }
            _ => {
                let this = (discriminant(leaf), 0);
                homogeneous &= *kind.get_or_insert(this) == this;
            }
        });
        if !homogeneous {
            return Err(Error::ArrayContentNotHomogeneous);
        }

        let dims = dimensions(value);
        check_shape(items, &dims)?;

        let codec = element_codec(self.element_oid)?;
        match self.format {
            FormatCode::Binary => self.encode_binary(value, codec, &dims, has_null),
            FormatCode::Text => {
                let mut out = Vec::new();
                encode_literal(value, codec, &mut out)?;
                Ok(out)
            }
        }
    }

    fn encode_binary(
        &self,
        value: &Value,
        codec: &TypeCodec,
        dims: &[usize],
        has_null: bool,
    ) -> Result<Vec<u8>> {
        let encode = codec
            .encode_binary
            .ok_or_else(|| Error::ArrayContentNotSupported(codec.name.to_string()))?;

        let mut out = Vec::new();
        out.extend_from_slice(&(dims.len() as i32).to_be_bytes());
        out.extend_from_slice(&i32::from(has_null).to_be_bytes());
        out.extend_from_slice(&self.element_oid.to_be_bytes());
        for &len in dims {
            out.extend_from_slice(&(len as i32).to_be_bytes());
            out.extend_from_slice(&1_i32.to_be_bytes());
        }

        let mut element = Vec::new();
        let mut result = Ok(());
        for_each_leaf(value, &mut |leaf| {
            if result.is_err() {
                return;
            }
            if leaf.is_null() {
                write_nullable(&mut out, None);
                return;
            }
            element.clear();
            result = encode(leaf, &mut element);
            write_nullable(&mut out, Some(&element));
        });
        result.map(|()| out)
    }
}

fn encode_literal(value: &Value, codec: &TypeCodec, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Array(items) => {
            out.push(b'{');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                encode_literal(item, codec, out)?;
            }
            out.push(b'}');
        }
        Value::Null => out.extend_from_slice(b"NULL"),
        leaf => {
            let encode = codec
                .encode_text
                .ok_or_else(|| Error::ArrayContentNotSupported(codec.name.to_string()))?;
            let mut text = Vec::new();
            encode(leaf, &mut text)?;
            out.push(b'"');
            for byte in text {
                if byte == b'"' || byte == b'\\' {
                    out.push(b'\\');
                }
                out.push(byte);
            }
            out.push(b'"');
        }
    }
    Ok(())
}

/// Rebuild the nested shape from elements in row-major order.
fn nest(flat: &mut impl Iterator<Item = Value>, dims: &[usize]) -> Value {
    match dims.split_first() {
        None => flat.next().unwrap_or(Value::Null),
        Some((&len, inner)) => Value::Array((0..len).map(|_| nest(flat, inner)).collect()),
    }
}

/// Dimension limit of the server (`MAXDIM`).
const MAX_DIMENSIONS: usize = 6;

/// Binary layout: ndim, has-null flag, element oid, (length, lower bound)
/// per dimension, then each element length-prefixed with -1 for NULL.
pub fn decode_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let (ndim, rest) = read_i32(bytes)?;
    let (_has_null, rest) = read_i32(rest)?;
    let (element_oid, mut rest) = read_u32(rest)?;
    let ndim = usize::try_from(ndim)
        .ok()
        .filter(|&n| n <= MAX_DIMENSIONS)
        .ok_or_else(|| Error::Decode(format!("invalid array dimension count {ndim}")))?;
    if ndim == 0 {
        return Ok(Value::Array(Vec::new()));
    }

    let mut dims = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        let (len, after_len) = read_i32(rest)?;
        let (_lower_bound, after) = read_i32(after_len)?;
        let len = usize::try_from(len)
            .map_err(|_| Error::Decode(format!("negative array dimension {len}")))?;
        dims.push(len);
        rest = after;
    }

    let total = dims
        .iter()
        .try_fold(1_usize, |acc, &len| acc.checked_mul(len))
        .ok_or_else(|| Error::Decode("array element count overflows".into()))?;
    let mut elements = Vec::with_capacity(total.min(rest.len() / 4));
    for _ in 0..total {
        let (len, after) = read_i32(rest)?;
        if len < 0 {
            elements.push(Value::Null);
            rest = after;
            continue;
        }
        let (payload, after) = after
            .split_at_checked(len as usize)
            .ok_or_else(|| Error::Decode("array element overruns payload".into()))?;
        elements.push(registry::decode(element_oid, FormatCode::Binary, payload)?);
        rest = after;
    }
    Ok(nest(&mut elements.into_iter(), &dims))
}

/// Parses an array literal such as `{{1,2},{NULL,"a \"b\""}}`.
/// A leading bounds decoration like `[0:2]=` is skipped.
pub fn decode_text(oid: Oid, bytes: &[u8]) -> Result<Value> {
    let element_oid = registry::lookup(oid)
        .and_then(|codec| codec.element_oid)
        .ok_or_else(|| Error::Decode(format!("oid {oid} is not an array type")))?;
    let s = utf8(bytes)?;
    let body = match s.strip_prefix('[') {
        Some(_) => s
            .split_once('=')
            .map(|(_, rest)| rest)
            .ok_or_else(|| Error::Decode(format!("invalid array bounds: {s:?}")))?,
        None => s,
    };

    let mut parser = LiteralParser {
        input: body.as_bytes(),
        pos: 0,
        element_oid,
    };
    let value = parser.array()?;
    parser.skip_whitespace();
    if parser.pos != parser.input.len() {
        return Err(parser.invalid());
    }
    Ok(value)
}

struct LiteralParser<'a> {
    input: &'a [u8],
    pos: usize,
    element_oid: Oid,
}

impl LiteralParser<'_> {
    fn invalid(&self) -> Error {
        Error::Decode(format!(
            "invalid array literal at byte {}: {:?}",
            self.pos,
            String::from_utf8_lossy(self.input)
        ))
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        self.skip_whitespace();
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.invalid())
        }
    }

    fn array(&mut self) -> Result<Value> {
        self.expect(b'{')?;
        let mut items = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(Value::Array(items));
        }
        loop {
            self.skip_whitespace();
            let item = match self.peek() {
                Some(b'{') => self.array()?,
                Some(b'"') => self.quoted()?,
                Some(_) => self.unquoted()?,
                None => return Err(self.invalid()),
            };
            items.push(item);
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Value::Array(items));
                }
                _ => return Err(self.invalid()),
            }
        }
    }

    fn quoted(&mut self) -> Result<Value> {
        self.pos += 1;
        let mut text = Vec::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    text.push(self.peek().ok_or_else(|| self.invalid())?);
                    self.pos += 1;
                }
                Some(byte) => {
                    text.push(byte);
                    self.pos += 1;
                }
                None => return Err(self.invalid()),
            }
        }
        registry::decode(self.element_oid, FormatCode::Text, &text)
    }

    fn unquoted(&mut self) -> Result<Value> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b != b',' && b != b'}') {
            self.pos += 1;
        }
        let raw = self.input[start..self.pos].trim_ascii();
        if raw.eq_ignore_ascii_case(b"NULL") {
            return Ok(Value::Null);
        }
        registry::decode(self.element_oid, FormatCode::Text, raw)
    }
}
