//! Codecs for bool, integer, float, string, bytea, uuid and json types.

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};

use super::{Value, utf8};

fn mismatch(value: &Value, target: &str) -> Error {
    Error::Encode(format!("cannot encode {value:?} as {target}"))
}

fn fixed<const N: usize>(bytes: &[u8], name: &str) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("invalid {name} length: {}", bytes.len())))
}

// === text-like ===

pub fn encode_text(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Text(s) | Value::Unknown { text: s, .. } => {
            buf.extend_from_slice(s.as_bytes());
            Ok(())
        }
        other => Err(mismatch(other, "text")),
    }
}

pub fn decode_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    Ok(Value::Text(utf8(bytes)?.to_string()))
}

// === bool ===

pub fn encode_bool_binary(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Bool(v) => {
            buf.push(u8::from(*v));
            Ok(())
        }
        other => Err(mismatch(other, "bool")),
    }
}

pub fn decode_bool_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let [b] = fixed::<1>(bytes, "bool")?;
    Ok(Value::Bool(b != 0))
}

pub fn encode_bool_text(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Bool(v) => {
            buf.push(if *v { b't' } else { b'f' });
            Ok(())
        }
        other => Err(mismatch(other, "bool")),
    }
}

pub fn decode_bool_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    match bytes {
        b"t" | b"true" => Ok(Value::Bool(true)),
        b"f" | b"false" => Ok(Value::Bool(false)),
        _ => Err(Error::Decode(format!(
            "invalid bool: {}",
            String::from_utf8_lossy(bytes)
        ))),
    }
}

// === integers ===

fn int_in_range<T: TryFrom<i64>>(value: &Value, target: &str) -> Result<T> {
    match value {
        Value::Int(v) => T::try_from(*v).map_err(|_| {
            Error::Encode(format!("{v} is out of range for {target}"))
        }),
        other => Err(mismatch(other, target)),
    }
}

pub fn encode_int2_binary(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    let v: i16 = int_in_range(value, "int2")?;
    buf.extend_from_slice(&v.to_be_bytes());
    Ok(())
}

pub fn encode_int4_binary(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    let v: i32 = int_in_range(value, "int4")?;
    buf.extend_from_slice(&v.to_be_bytes());
    Ok(())
}

pub fn encode_int8_binary(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    let v: i64 = int_in_range(value, "int8")?;
    buf.extend_from_slice(&v.to_be_bytes());
    Ok(())
}

pub fn encode_oid_binary(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    let v: u32 = int_in_range(value, "oid")?;
    buf.extend_from_slice(&v.to_be_bytes());
    Ok(())
}

/// Integers of any width decode to `Value::Int`.
pub fn decode_int_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let v = match bytes.len() {
        2 => i64::from(i16::from_be_bytes(fixed(bytes, "int2")?)),
        4 => i64::from(i32::from_be_bytes(fixed(bytes, "int4")?)),
        8 => i64::from_be_bytes(fixed(bytes, "int8")?),
        n => return Err(Error::Decode(format!("invalid integer length: {n}"))),
    };
    Ok(Value::Int(v))
}

pub fn decode_oid_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    Ok(Value::Int(i64::from(u32::from_be_bytes(fixed(bytes, "oid")?))))
}

pub fn encode_int_text(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Int(v) => {
            buf.extend_from_slice(v.to_string().as_bytes());
            Ok(())
        }
        other => Err(mismatch(other, "integer")),
    }
}

pub fn decode_int_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    s.trim()
        .parse()
        .map(Value::Int)
        .map_err(|e| Error::Decode(format!("invalid integer {s:?}: {e}")))
}

/// `int2vector` text form: space-separated integers.
pub fn decode_int2vector_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    s.split_ascii_whitespace()
        .map(|part| {
            part.parse()
                .map(Value::Int)
                .map_err(|e| Error::Decode(format!("invalid int2vector {s:?}: {e}")))
        })
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

// === floats ===

/// Text token for a non-finite float.
pub fn float_token(v: f64) -> &'static str {
    if v.is_nan() {
        "NaN"
    } else if v.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

pub fn encode_float4_binary(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Float4(v) => {
            buf.extend_from_slice(&v.to_bits().to_be_bytes());
            Ok(())
        }
        other => Err(mismatch(other, "float4")),
    }
}

pub fn encode_float8_binary(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Float8(v) => {
            buf.extend_from_slice(&v.to_bits().to_be_bytes());
            Ok(())
        }
        other => Err(mismatch(other, "float8")),
    }
}

pub fn decode_float4_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    Ok(Value::Float4(f32::from_bits(u32::from_be_bytes(fixed(
        bytes, "float4",
    )?))))
}

pub fn decode_float8_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    Ok(Value::Float8(f64::from_bits(u64::from_be_bytes(fixed(
        bytes, "float8",
    )?))))
}

pub fn encode_float_text(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    let text = match value {
        Value::Float4(v) if v.is_finite() => v.to_string(),
        Value::Float8(v) if v.is_finite() => v.to_string(),
        Value::Float4(v) => float_token(f64::from(*v)).to_string(),
        Value::Float8(v) => float_token(*v).to_string(),
        other => return Err(mismatch(other, "float")),
    };
    buf.extend_from_slice(text.as_bytes());
    Ok(())
}

pub fn decode_float_text(oid: Oid, bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    let invalid = |e| Error::Decode(format!("invalid float {s:?}: {e}"));
    if oid == oid::FLOAT4 {
        s.parse().map(Value::Float4).map_err(invalid)
    } else {
        s.parse().map(Value::Float8).map_err(invalid)
    }
}

// === bytea ===

pub fn encode_bytea_binary(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Bytes(b) => {
            buf.extend_from_slice(b);
            Ok(())
        }
        other => Err(mismatch(other, "bytea")),
    }
}

pub fn decode_bytea_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    Ok(Value::Bytes(bytes.to_vec()))
}

/// Hex output format, `\x0a0b`.
pub fn encode_bytea_text(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    match value {
        Value::Bytes(b) => {
            buf.extend_from_slice(b"\\x");
            for byte in b {
                buf.push(HEX[usize::from(byte >> 4)]);
                buf.push(HEX[usize::from(byte & 0x0f)]);
            }
            Ok(())
        }
        other => Err(mismatch(other, "bytea")),
    }
}

/// Accepts both the hex and the legacy escape output formats.
pub fn decode_bytea_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let invalid = || Error::Decode("invalid bytea text".into());
    let hex_digit = |c: u8| (c as char).to_digit(16).map(|d| d as u8);

    if let Some(hex) = bytes.strip_prefix(b"\\x") {
        if hex.len() % 2 != 0 {
            return Err(invalid());
        }
        return hex
            .chunks_exact(2)
            .map(|pair| Some((hex_digit(pair[0])? << 4) | hex_digit(pair[1])?))
            .collect::<Option<Vec<u8>>>()
            .map(Value::Bytes)
            .ok_or_else(invalid);
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut rest = bytes;
    while let Some((&c, tail)) = rest.split_first() {
        if c != b'\\' {
            out.push(c);
            rest = tail;
            continue;
        }
        match tail {
            [b'\\', more @ ..] => {
                out.push(b'\\');
                rest = more;
            }
            [a @ b'0'..=b'3', b @ b'0'..=b'7', c @ b'0'..=b'7', more @ ..] => {
                out.push(((a - b'0') << 6) | ((b - b'0') << 3) | (c - b'0'));
                rest = more;
            }
            _ => return Err(invalid()),
        }
    }
    Ok(Value::Bytes(out))
}

// === uuid ===

pub fn encode_uuid_binary(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Uuid(u) => {
            buf.extend_from_slice(u.as_bytes());
            Ok(())
        }
        other => Err(mismatch(other, "uuid")),
    }
}

pub fn decode_uuid_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    Ok(Value::Uuid(Uuid::from_bytes(fixed(bytes, "uuid")?)))
}

pub fn encode_uuid_text(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Uuid(u) => {
            buf.extend_from_slice(u.hyphenated().to_string().as_bytes());
            Ok(())
        }
        other => Err(mismatch(other, "uuid")),
    }
}

pub fn decode_uuid_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    Uuid::try_parse_ascii(bytes)
        .map(Value::Uuid)
        .map_err(|e| Error::Decode(format!("invalid uuid: {e}")))
}

// === json / jsonb ===

const JSONB_VERSION: u8 = 1;

pub fn encode_json_text(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Json(json) => serde_json::to_writer(buf, json)
            .map_err(|e| Error::Encode(format!("json: {e}"))),
        Value::Text(s) | Value::Unknown { text: s, .. } => {
            buf.extend_from_slice(s.as_bytes());
            Ok(())
        }
        other => Err(mismatch(other, "json")),
    }
}

pub fn decode_json_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes)
        .map(Value::Json)
        .map_err(|e| Error::Decode(format!("invalid json: {e}")))
}

pub fn encode_jsonb_binary(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    buf.push(JSONB_VERSION);
    encode_json_text(value, buf)
}

pub fn decode_jsonb_binary(oid: Oid, bytes: &[u8]) -> Result<Value> {
    match bytes.split_first() {
        Some((&JSONB_VERSION, text)) => decode_json_text(oid, text),
        _ => Err(Error::Decode("unsupported jsonb version".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_range_checks() {
        let mut buf = Vec::new();
        assert!(encode_int2_binary(&Value::Int(32768), &mut buf).is_err());
        encode_int4_binary(&Value::Int(32768), &mut buf).unwrap();
        assert_eq!(buf, 32768_i32.to_be_bytes());
        assert!(encode_int2_binary(&Value::Bool(true), &mut buf).is_err());
    }

    #[test]
    fn floats_from_text() {
        assert_eq!(
            decode_float_text(oid::FLOAT8, b"Infinity").unwrap(),
            Value::Float8(f64::INFINITY)
        );
        assert_eq!(
            decode_float_text(oid::FLOAT4, b"-Infinity").unwrap(),
            Value::Float4(f32::NEG_INFINITY)
        );
        let nan = decode_float_text(oid::FLOAT8, b"NaN").unwrap();
        assert!(nan.as_f64().unwrap().is_nan());
        assert_eq!(
            decode_float_text(oid::FLOAT8, b"1.1").unwrap(),
            Value::Float8(1.1)
        );
    }

    #[test]
    fn bytea_text_formats() {
        let mut buf = Vec::new();
        encode_bytea_text(&Value::Bytes(vec![0xde, 0xad, 0x01]), &mut buf).unwrap();
        assert_eq!(buf, b"\\xdead01");
        assert_eq!(
            decode_bytea_text(oid::BYTEA, &buf).unwrap(),
            Value::Bytes(vec![0xde, 0xad, 0x01])
        );
        assert_eq!(
            decode_bytea_text(oid::BYTEA, b"a\\\\b\\001").unwrap(),
            Value::Bytes(vec![b'a', b'\\', b'b', 1])
        );
        assert!(decode_bytea_text(oid::BYTEA, b"\\xabc").is_err());
    }

    #[test]
    fn jsonb_carries_a_version_byte() {
        let json = Value::Json(serde_json::json!({"a": [1, 2]}));
        let mut buf = Vec::new();
        encode_jsonb_binary(&json, &mut buf).unwrap();
        assert_eq!(buf[0], 1);
        assert_eq!(decode_jsonb_binary(oid::JSONB, &buf).unwrap(), json);
        assert!(decode_jsonb_binary(oid::JSONB, b"\x02{}").is_err());
    }

    #[test]
    fn uuid_text() {
        let text = b"911460f2-1f43-fea2-3e2c-e01fd5b5069d";
        let decoded = decode_uuid_text(oid::UUID, text).unwrap();
        let mut buf = Vec::new();
        encode_uuid_text(&decoded, &mut buf).unwrap();
        assert_eq!(buf, text);
    }

    #[test]
    fn bool_text() {
        assert_eq!(decode_bool_text(oid::BOOL, b"t").unwrap(), Value::Bool(true));
        assert!(decode_bool_text(oid::BOOL, b"x").is_err());
    }
}
