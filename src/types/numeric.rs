//! Arbitrary-precision `numeric`, kept as its decimal digit string.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::protocol::codec::{read_i16, read_u16};
use crate::protocol::types::Oid;

use super::{Value, utf8};

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// A decimal number exactly as PostgreSQL prints it, e.g. `-1000000000.123456789`.
///
/// Scale and precision are never touched: `1.0` stays `1.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Numeric(String);

impl Numeric {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_nan(&self) -> bool {
        self.0 == "NaN"
    }
}

fn is_decimal_literal(s: &str) -> bool {
    let body = s.strip_prefix(['-', '+']).unwrap_or(s);
    let (mantissa, exponent) = match body.split_once(['e', 'E']) {
        Some((m, e)) => (m, Some(e)),
        None => (body, None),
    };
    let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    let mantissa_ok = !(int.is_empty() && frac.is_empty()) && digits(int) && digits(frac);
    let exponent_ok = exponent.is_none_or(|e| {
        let e = e.strip_prefix(['-', '+']).unwrap_or(e);
        !e.is_empty() && digits(e)
    });
    mantissa_ok && exponent_ok
}

impl FromStr for Numeric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NaN" | "Infinity" | "-Infinity" => Ok(Self(s.to_string())),
            _ if is_decimal_literal(s) => Ok(Self(s.to_string())),
            _ => Err(Error::Encode(format!("invalid numeric literal: {s:?}"))),
        }
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for Numeric {
    fn from(v: i64) -> Self {
        Self(v.to_string())
    }
}

pub fn encode_text(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Numeric(n) => {
            buf.extend_from_slice(n.as_str().as_bytes());
            Ok(())
        }
        Value::Int(v) => {
            buf.extend_from_slice(v.to_string().as_bytes());
            Ok(())
        }
        other => Err(Error::Encode(format!("cannot encode {other:?} as numeric"))),
    }
}

pub fn decode_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    utf8(bytes)
        .and_then(|s| s.parse().map_err(|_| Error::Decode(format!("invalid numeric {s:?}"))))
        .map(Value::Numeric)
}

/// Binary layout: ndigits, weight, sign, dscale (all 16-bit), then `ndigits`
/// base-10000 digits, most significant first. Digit `k` has weight `weight - k`.
pub fn decode_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let (ndigits, rest) = read_i16(bytes)?;
    let (weight, rest) = read_i16(rest)?;
    let (sign, rest) = read_u16(rest)?;
    let (dscale, mut rest) = read_u16(rest)?;

    let special = match sign {
        NUMERIC_NAN => Some("NaN"),
        NUMERIC_PINF => Some("Infinity"),
        NUMERIC_NINF => Some("-Infinity"),
        NUMERIC_POS | NUMERIC_NEG => None,
        other => return Err(Error::Decode(format!("invalid numeric sign {other:#06x}"))),
    };
    if let Some(token) = special {
        return Ok(Value::Numeric(Numeric(token.to_string())));
    }

    let mut digits = Vec::with_capacity(ndigits.max(0) as usize);
    for _ in 0..ndigits {
        let (digit, remaining) = read_i16(rest)?;
        if !(0..10000).contains(&digit) {
            return Err(Error::Decode(format!("invalid numeric digit {digit}")));
        }
        digits.push(digit);
        rest = remaining;
    }
    let digit_at = |k: i32| -> i16 {
        usize::try_from(k)
            .ok()
            .and_then(|k| digits.get(k).copied())
            .unwrap_or(0)
    };

    let weight = i32::from(weight);
    let mut out = String::new();
    if sign == NUMERIC_NEG && !digits.is_empty() {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit_at(0).to_string());
        for k in 1..=weight {
            out.push_str(&format!("{:04}", digit_at(k)));
        }
    }

    let dscale = usize::from(dscale);
    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut k = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit_at(k)));
            k += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Ok(Value::Numeric(Numeric(out)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(weight: i16, sign: u16, dscale: u16, digits: &[i16]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(digits.len() as i16).to_be_bytes());
        buf.extend_from_slice(&weight.to_be_bytes());
        buf.extend_from_slice(&sign.to_be_bytes());
        buf.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            buf.extend_from_slice(&d.to_be_bytes());
        }
        buf
    }

    fn decoded(bytes: &[u8]) -> String {
        match decode_binary(1700, bytes).unwrap() {
            Value::Numeric(n) => n.into_string(),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn binary_digits() {
        assert_eq!(decoded(&wire(0, NUMERIC_POS, 1, &[1, 1000])), "1.1");
        assert_eq!(decoded(&wire(0, NUMERIC_NEG, 1, &[1, 1000])), "-1.1");
        assert_eq!(decoded(&wire(0, NUMERIC_POS, 1, &[1])), "1.0");
        assert_eq!(decoded(&wire(1, NUMERIC_POS, 0, &[2])), "20000");
        assert_eq!(decoded(&wire(0, NUMERIC_POS, 0, &[])), "0");
        assert_eq!(decoded(&wire(0, NUMERIC_POS, 2, &[])), "0.00");
        assert_eq!(decoded(&wire(-1, NUMERIC_POS, 3, &[50])), "0.005");
        assert_eq!(
            decoded(&wire(2, NUMERIC_NEG, 9, &[10, 0, 0, 1234, 5678, 9000])),
            "-1000000000.123456789"
        );
    }

    #[test]
    fn special_values() {
        assert_eq!(decoded(&wire(0, NUMERIC_NAN, 0, &[])), "NaN");
        assert_eq!(decoded(&wire(0, NUMERIC_NINF, 0, &[])), "-Infinity");
        assert!(decode_binary(1700, &wire(0, 0x1234, 0, &[])).is_err());
        assert!(decode_binary(1700, &[0, 1, 0, 0]).is_err());
    }

    #[test]
    fn literal_validation() {
        for ok in ["1.1", "-1000000000.123456789", "1.0", ".5", "5.", "1e10", "NaN"] {
            assert_eq!(ok.parse::<Numeric>().unwrap().as_str(), ok);
        }
        for bad in ["", "-", "1.2.3", "abc", "1e", "1,0"] {
            assert!(bad.parse::<Numeric>().is_err(), "{bad}");
        }
    }
}
