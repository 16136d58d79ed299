//! Values and their wire encodings.
//!
//! [`Value`] is what callers bind as parameters and what result rows decode
//! into. The per-oid conversions live in the [`registry`]; the other
//! submodules hold the codec functions it points at.

pub mod array;
pub mod numeric;
pub mod registry;
pub mod scalar;
pub mod temporal;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

pub use array::{ArrayEncoder, array_inspect};
pub use numeric::Numeric;
pub use temporal::Interval;

/// A PostgreSQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    /// Sent as the narrowest of int2/int4/int8 that holds it
    Int(i64),
    Float4(f32),
    Float8(f64),
    Numeric(Numeric),
    /// Sent with the `unknown` oid so the server picks the target type
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Interval(Interval),
    Uuid(Uuid),
    Json(serde_json::Value),
    /// Possibly nested; inner `Array`s are sub-dimensions
    Array(Vec<Value>),
    /// Value of a type this crate has no codec for, in its text form
    Unknown { oid: Oid, text: String },
}

/// One encoded parameter, ready for Bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub oid: Oid,
    pub format: FormatCode,
    /// `None` is SQL NULL
    pub bytes: Option<Vec<u8>>,
}

impl Encoded {
    pub fn null() -> Self {
        Self {
            oid: oid::UNSPECIFIED,
            format: FormatCode::Text,
            bytes: None,
        }
    }
}

/// Narrowest integer type oid whose range covers `v`.
pub fn int_oid(v: i64) -> Oid {
    if i16::try_from(v).is_ok() {
        oid::INT2
    } else if i32::try_from(v).is_ok() {
        oid::INT4
    } else {
        oid::INT8
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type oid this value is sent as. `Null` and `Array` report `0`; arrays
    /// get their oid from [`array_inspect`].
    pub fn type_oid(&self) -> Oid {
        match self {
            Value::Null | Value::Array(_) => oid::UNSPECIFIED,
            Value::Bool(_) => oid::BOOL,
            Value::Int(v) => int_oid(*v),
            Value::Float4(_) => oid::FLOAT4,
            Value::Float8(_) => oid::FLOAT8,
            Value::Numeric(_) => oid::NUMERIC,
            Value::Text(_) => oid::UNKNOWN,
            Value::Bytes(_) => oid::BYTEA,
            Value::Date(_) => oid::DATE,
            Value::Time(_) => oid::TIME,
            Value::Timestamp(_) => oid::TIMESTAMP,
            Value::TimestampTz(_) => oid::TIMESTAMPTZ,
            Value::Interval(_) => oid::INTERVAL,
            Value::Uuid(_) => oid::UUID,
            Value::Json(_) => oid::JSON,
            Value::Unknown { oid, .. } => *oid,
        }
    }

    /// Encode as a Bind parameter, in binary when the type's codec has a
    /// binary encoder and in text otherwise.
    pub fn encode(&self) -> Result<Encoded> {
        match self {
            Value::Null => Ok(Encoded::null()),
            Value::Array(_) => {
                let (array_oid, format, encoder) = array_inspect(self)?;
                Ok(Encoded {
                    oid: array_oid,
                    format,
                    bytes: Some(encoder.encode(self)?),
                })
            }
            // Non-finite floats go as text tokens under an explicit oid.
            Value::Float4(v) if !v.is_finite() => Ok(Encoded {
                oid: oid::FLOAT4,
                format: FormatCode::Text,
                bytes: Some(scalar::float_token(f64::from(*v)).into()),
            }),
            Value::Float8(v) if !v.is_finite() => Ok(Encoded {
                oid: oid::FLOAT8,
                format: FormatCode::Text,
                bytes: Some(scalar::float_token(*v).into()),
            }),
            Value::Unknown { oid, text } if registry::lookup(*oid).is_none() => Ok(Encoded {
                oid: *oid,
                format: FormatCode::Text,
                bytes: Some(text.clone().into_bytes()),
            }),
            _ => registry::encode(self.type_oid(), self),
        }
    }

    /// Decode one column value. `None` is SQL NULL.
    pub fn decode(oid: Oid, format: FormatCode, bytes: Option<&[u8]>) -> Result<Value> {
        match bytes {
            None => Ok(Value::Null),
            Some(bytes) => registry::decode(oid, format, bytes),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float4(v) => Some(f64::from(*v)),
            Value::Float8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Unknown { text: s, .. } => Some(s),
            Value::Numeric(n) => Some(n.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// Read a payload as UTF-8 for the text decoders.
pub(crate) fn utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => Int,
    u16 => Int,
    u32 => Int,
    f32 => Float4,
    f64 => Float8,
    Numeric => Numeric,
    String => Text,
    &str => Text,
    Vec<u8> => Bytes,
    &[u8] => Bytes,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => Timestamp,
    DateTime<FixedOffset> => TimestampTz,
    Interval => Interval,
    Uuid => Uuid,
    serde_json::Value => Json,
    Vec<Value> => Array,
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::TimestampTz(v.fixed_offset())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> FromIterator<T> for Value {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Value::Array(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Value) {
        let encoded = value.encode().unwrap();
        let decoded = Value::decode(encoded.oid, encoded.format, encoded.bytes.as_deref()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn integer_width_boundaries() {
        assert_eq!(Value::Int(32767).encode().unwrap().oid, oid::INT2);
        assert_eq!(Value::Int(-32768).encode().unwrap().oid, oid::INT2);
        assert_eq!(Value::Int(32768).encode().unwrap().oid, oid::INT4);
        assert_eq!(Value::Int(2147483647).encode().unwrap().oid, oid::INT4);
        assert_eq!(Value::Int(-2147483649).encode().unwrap().oid, oid::INT8);

        let big = Value::Int(2147483648).encode().unwrap();
        assert_eq!(big.oid, oid::INT8);
        assert_eq!(big.bytes.unwrap().len(), 8);
        assert_eq!(Value::Int(32767).encode().unwrap().bytes.unwrap().len(), 2);
    }

    #[test]
    fn scalar_round_trips() {
        round_trip(Value::Bool(true));
        round_trip(Value::Int(-7));
        round_trip(Value::Int(i64::MIN));
        round_trip(Value::Float8(1.756e-12));
        round_trip(Value::Float4(0.1));
        round_trip(Value::Bytes(vec![0, 255, 10]));
        round_trip(Value::Uuid(Uuid::from_u128(0x911460f21f43fea23e2ce01fd5b5069d)));
        round_trip(Value::Interval(Interval {
            months: 24,
            days: 2,
            microseconds: 123456789,
        }));
        round_trip(Value::Date(NaiveDate::from_ymd_opt(2001, 2, 3).unwrap()));
        round_trip(Value::Time(NaiveTime::from_hms_opt(4, 5, 6).unwrap()));
        round_trip(Value::Timestamp(
            NaiveDate::from_ymd_opt(2001, 2, 3)
                .unwrap()
                .and_hms_micro_opt(4, 5, 6, 170000)
                .unwrap(),
        ));
    }

    #[test]
    fn float_bits_are_preserved() {
        let v = 1.756e-12_f64;
        let encoded = Value::Float8(v).encode().unwrap();
        assert_eq!(encoded.format, FormatCode::Binary);
        assert_eq!(encoded.bytes.as_deref(), Some(&v.to_bits().to_be_bytes()[..]));
    }

    #[test]
    fn non_finite_floats_go_as_text() {
        let inf = Value::Float8(f64::INFINITY).encode().unwrap();
        assert_eq!(inf.oid, oid::FLOAT8);
        assert_eq!(inf.format, FormatCode::Text);
        assert_eq!(inf.bytes.as_deref(), Some(&b"Infinity"[..]));

        let nan = Value::Float4(f32::NAN).encode().unwrap();
        assert_eq!(nan.oid, oid::FLOAT4);
        assert_eq!(nan.bytes.as_deref(), Some(&b"NaN"[..]));

        let neg = Value::Float8(f64::NEG_INFINITY).encode().unwrap();
        assert_eq!(neg.bytes.as_deref(), Some(&b"-Infinity"[..]));
    }

    #[test]
    fn text_is_sent_untyped() {
        let encoded = Value::from("hello").encode().unwrap();
        assert_eq!(encoded.oid, oid::UNKNOWN);
        assert_eq!(encoded.format, FormatCode::Text);
        assert_eq!(Value::Null.encode().unwrap(), Encoded::null());
    }

    #[test]
    fn parameter_formats() {
        let date = NaiveDate::from_ymd_opt(2007, 3, 13).unwrap();
        let cases = [
            (Value::Bool(true), oid::BOOL, FormatCode::Binary),
            (Value::Int(5), oid::INT2, FormatCode::Binary),
            (Value::Float4(1.5), oid::FLOAT4, FormatCode::Binary),
            (Value::Float8(1.5), oid::FLOAT8, FormatCode::Binary),
            (Value::Numeric("1.5".parse().unwrap()), oid::NUMERIC, FormatCode::Text),
            (Value::from("5"), oid::UNKNOWN, FormatCode::Text),
            (Value::Bytes(vec![1]), oid::BYTEA, FormatCode::Binary),
            (Value::Date(date), oid::DATE, FormatCode::Binary),
            (Value::Time(NaiveTime::MIN), oid::TIME, FormatCode::Binary),
            (Value::Timestamp(date.and_time(NaiveTime::MIN)), oid::TIMESTAMP, FormatCode::Binary),
            (
                Value::TimestampTz(date.and_time(NaiveTime::MIN).and_utc().fixed_offset()),
                oid::TIMESTAMPTZ,
                FormatCode::Binary,
            ),
            (Value::Interval(Interval::new(1, 2, 3)), oid::INTERVAL, FormatCode::Binary),
            (Value::Uuid(Uuid::nil()), oid::UUID, FormatCode::Binary),
            (Value::Json(serde_json::json!({"a": 1})), oid::JSON, FormatCode::Text),
            (Value::from(vec![Value::Int(1)]), oid::INT2_ARRAY, FormatCode::Binary),
            (Value::from(vec![Value::from("a")]), oid::TEXT_ARRAY, FormatCode::Text),
        ];
        for (value, oid, format) in cases {
            let encoded = value.encode().unwrap();
            assert_eq!((encoded.oid, encoded.format), (oid, format), "{value:?}");
        }
    }

    #[test]
    fn text_based_round_trips() {
        round_trip(Value::Numeric("-12345.678900".parse().unwrap()));
        round_trip(Value::Numeric("NaN".parse().unwrap()));
        round_trip(Value::Json(serde_json::json!({"a": [1, null, "x"], "b": true})));
        round_trip(Value::from(vec![Value::from("a \"b\""), Value::Null, Value::from("")]));
        round_trip(Value::Time(temporal::END_OF_DAY));
    }

    #[test]
    fn timestamptz_round_trips_as_instant() {
        let offset = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let local = NaiveDate::from_ymd_opt(2001, 2, 3)
            .unwrap()
            .and_hms_micro_opt(4, 5, 6, 7)
            .unwrap()
            .and_local_timezone(offset)
            .unwrap();
        let encoded = Value::TimestampTz(local).encode().unwrap();
        let decoded =
            Value::decode(encoded.oid, encoded.format, encoded.bytes.as_deref()).unwrap();
        let Value::TimestampTz(decoded) = decoded else {
            panic!("expected timestamptz, got {decoded:?}");
        };
        assert_eq!(decoded, local);
        assert_eq!(decoded.offset().local_minus_utc(), 0);
    }

    #[test]
    fn unregistered_types_pass_through_as_text() {
        let decoded = Value::decode(16385, FormatCode::Text, Some(b"happy")).unwrap();
        assert_eq!(
            decoded,
            Value::Unknown {
                oid: 16385,
                text: "happy".into()
            }
        );
        let encoded = decoded.encode().unwrap();
        assert_eq!((encoded.oid, encoded.format), (16385, FormatCode::Text));
    }

    #[test]
    fn conversions() {
        assert_eq!(Value::from(Some(3_i32)), Value::Int(3));
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(
            [1, 2].into_iter().collect::<Value>(),
            Value::Array(vec![Value::Int(1), Value::Int(2)])
        );
    }
}
