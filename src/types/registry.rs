//! Process-wide table of type codecs, keyed by oid.
//!
//! Built once on first use and never mutated afterwards.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

use super::{Encoded, Value, array, numeric, scalar, temporal, utf8};

/// Appends the encoding of a value to a buffer.
pub type EncodeFn = fn(&Value, &mut Vec<u8>) -> Result<()>;

/// Decodes one non-NULL payload of the given oid.
pub type DecodeFn = fn(Oid, &[u8]) -> Result<Value>;

/// Conversions for one type oid.
#[derive(Debug, Clone, Copy)]
pub struct TypeCodec {
    pub oid: Oid,
    pub name: &'static str,
    /// Oid of the array type whose elements are this type
    pub array_oid: Option<Oid>,
    /// For array types, the element oid
    pub element_oid: Option<Oid>,
    pub encode_binary: Option<EncodeFn>,
    pub encode_text: Option<EncodeFn>,
    pub decode_binary: Option<DecodeFn>,
    pub decode_text: DecodeFn,
}

impl TypeCodec {
    /// A type handled as text both ways, decoding to [`Value::Text`].
    const fn text(oid: Oid, name: &'static str) -> Self {
        Self {
            oid,
            name,
            array_oid: None,
            element_oid: None,
            encode_binary: None,
            encode_text: Some(scalar::encode_text),
            decode_binary: None,
            decode_text: scalar::decode_text,
        }
    }

    /// An array type over `element_oid`.
    const fn array(oid: Oid, name: &'static str, element_oid: Oid) -> Self {
        Self {
            oid,
            name,
            array_oid: None,
            element_oid: Some(element_oid),
            encode_binary: None,
            encode_text: None,
            decode_binary: Some(array::decode_binary),
            decode_text: array::decode_text,
        }
    }

    const fn with_array(mut self, array_oid: Oid) -> Self {
        self.array_oid = Some(array_oid);
        self
    }

    /// Text-like types whose binary form is the UTF-8 bytes themselves.
    const fn utf8_binary(mut self) -> Self {
        self.encode_binary = Some(scalar::encode_text);
        self.decode_binary = Some(scalar::decode_text);
        self
    }

    const fn binary(mut self, encode: EncodeFn, decode: DecodeFn) -> Self {
        self.encode_binary = Some(encode);
        self.decode_binary = Some(decode);
        self
    }

    const fn text_codec(mut self, encode: Option<EncodeFn>, decode: DecodeFn) -> Self {
        self.encode_text = encode;
        self.decode_text = decode;
        self
    }
}

static REGISTRY: LazyLock<HashMap<Oid, TypeCodec>> = LazyLock::new(|| {
    let scalars = [
        TypeCodec::text(oid::BOOL, "bool")
            .with_array(oid::BOOL_ARRAY)
            .binary(scalar::encode_bool_binary, scalar::decode_bool_binary)
            .text_codec(Some(scalar::encode_bool_text), scalar::decode_bool_text),
        TypeCodec::text(oid::BYTEA, "bytea")
            .with_array(oid::BYTEA_ARRAY)
            .binary(scalar::encode_bytea_binary, scalar::decode_bytea_binary)
            .text_codec(Some(scalar::encode_bytea_text), scalar::decode_bytea_text),
        TypeCodec::text(oid::CHAR, "char")
            .with_array(oid::CHAR_ARRAY)
            .utf8_binary(),
        TypeCodec::text(oid::NAME, "name")
            .with_array(oid::NAME_ARRAY)
            .utf8_binary(),
        TypeCodec::text(oid::INT2, "int2")
            .with_array(oid::INT2_ARRAY)
            .binary(scalar::encode_int2_binary, scalar::decode_int_binary)
            .text_codec(Some(scalar::encode_int_text), scalar::decode_int_text),
        TypeCodec::text(oid::INT4, "int4")
            .with_array(oid::INT4_ARRAY)
            .binary(scalar::encode_int4_binary, scalar::decode_int_binary)
            .text_codec(Some(scalar::encode_int_text), scalar::decode_int_text),
        TypeCodec::text(oid::INT8, "int8")
            .with_array(oid::INT8_ARRAY)
            .binary(scalar::encode_int8_binary, scalar::decode_int_binary)
            .text_codec(Some(scalar::encode_int_text), scalar::decode_int_text),
        TypeCodec::text(oid::OID, "oid")
            .with_array(oid::OID_ARRAY)
            .binary(scalar::encode_oid_binary, scalar::decode_oid_binary)
            .text_codec(Some(scalar::encode_int_text), scalar::decode_int_text),
        TypeCodec::text(oid::XID, "xid")
            .binary(scalar::encode_oid_binary, scalar::decode_oid_binary)
            .text_codec(Some(scalar::encode_int_text), scalar::decode_int_text),
        TypeCodec::text(oid::TEXT, "text")
            .with_array(oid::TEXT_ARRAY)
            .utf8_binary(),
        TypeCodec::text(oid::JSON, "json")
            .with_array(oid::JSON_ARRAY)
            .text_codec(Some(scalar::encode_json_text), scalar::decode_json_text),
        TypeCodec::text(oid::XML, "xml"),
        TypeCodec::text(oid::CIDR, "cidr"),
        TypeCodec::text(oid::FLOAT4, "float4")
            .with_array(oid::FLOAT4_ARRAY)
            .binary(scalar::encode_float4_binary, scalar::decode_float4_binary)
            .text_codec(Some(scalar::encode_float_text), scalar::decode_float_text),
        TypeCodec::text(oid::FLOAT8, "float8")
            .with_array(oid::FLOAT8_ARRAY)
            .binary(scalar::encode_float8_binary, scalar::decode_float8_binary)
            .text_codec(Some(scalar::encode_float_text), scalar::decode_float_text),
        // Untyped string literals go as text so that the server may parse them
        // as whatever type it infers. Arrays of them are sent as text[].
        TypeCodec::text(oid::UNKNOWN, "unknown").with_array(oid::TEXT_ARRAY),
        TypeCodec::text(oid::MACADDR, "macaddr"),
        TypeCodec::text(oid::INET, "inet"),
        TypeCodec::text(oid::BPCHAR, "bpchar")
            .with_array(oid::BPCHAR_ARRAY)
            .utf8_binary(),
        TypeCodec::text(oid::VARCHAR, "varchar")
            .with_array(oid::VARCHAR_ARRAY)
            .utf8_binary(),
        TypeCodec::text(oid::DATE, "date")
            .with_array(oid::DATE_ARRAY)
            .binary(temporal::encode_date_binary, temporal::decode_date_binary)
            .text_codec(Some(temporal::encode_text), temporal::decode_date_text),
        TypeCodec::text(oid::TIME, "time")
            .with_array(oid::TIME_ARRAY)
            .binary(temporal::encode_time_binary, temporal::decode_time_binary)
            .text_codec(Some(temporal::encode_text), temporal::decode_time_text),
        TypeCodec::text(oid::TIMESTAMP, "timestamp")
            .with_array(oid::TIMESTAMP_ARRAY)
            .binary(
                temporal::encode_timestamp_binary,
                temporal::decode_timestamp_binary,
            )
            .text_codec(Some(temporal::encode_text), temporal::decode_timestamp_text),
        TypeCodec::text(oid::TIMESTAMPTZ, "timestamptz")
            .with_array(oid::TIMESTAMPTZ_ARRAY)
            .binary(
                temporal::encode_timestamptz_binary,
                temporal::decode_timestamptz_binary,
            )
            .text_codec(
                Some(temporal::encode_text),
                temporal::decode_timestamptz_text,
            ),
        TypeCodec::text(oid::INTERVAL, "interval")
            .with_array(oid::INTERVAL_ARRAY)
            .binary(
                temporal::encode_interval_binary,
                temporal::decode_interval_binary,
            )
            .text_codec(Some(temporal::encode_text), temporal::decode_interval_text),
        // numeric parameters always go as text
        TypeCodec {
            decode_binary: Some(numeric::decode_binary),
            ..TypeCodec::text(oid::NUMERIC, "numeric")
        }
        .with_array(oid::NUMERIC_ARRAY)
        .text_codec(Some(numeric::encode_text), numeric::decode_text),
        TypeCodec::text(oid::CSTRING, "cstring")
            .with_array(oid::CSTRING_ARRAY)
            .utf8_binary(),
        TypeCodec::text(oid::UUID, "uuid")
            .with_array(oid::UUID_ARRAY)
            .binary(scalar::encode_uuid_binary, scalar::decode_uuid_binary)
            .text_codec(Some(scalar::encode_uuid_text), scalar::decode_uuid_text),
        TypeCodec::text(oid::JSONB, "jsonb")
            .with_array(oid::JSONB_ARRAY)
            .binary(scalar::encode_jsonb_binary, scalar::decode_jsonb_binary)
            .text_codec(Some(scalar::encode_json_text), scalar::decode_json_text),
        // int2vector shares the array wire format
        TypeCodec::array(oid::INT2VECTOR, "int2vector", oid::INT2)
            .text_codec(None, scalar::decode_int2vector_text),
    ];

    let mut table = HashMap::with_capacity(scalars.len() * 2);
    for codec in scalars {
        if let Some(array_oid) = codec.array_oid
            && codec.oid != oid::UNKNOWN
        {
            table.insert(array_oid, TypeCodec::array(array_oid, "array", codec.oid));
        }
        table.insert(codec.oid, codec);
    }
    table
});

/// Codec for `oid`, if registered.
pub fn lookup(oid: Oid) -> Option<&'static TypeCodec> {
    REGISTRY.get(&oid)
}

/// Format to request for a result column of this type.
///
/// Arrays come in binary only when their elements do.
pub fn result_format(oid: Oid) -> FormatCode {
    let binary = lookup(oid).is_some_and(|codec| {
        codec.decode_binary.is_some()
            && codec
                .element_oid
                .is_none_or(|element| lookup(element).is_some_and(|e| e.decode_binary.is_some()))
    });
    if binary {
        FormatCode::Binary
    } else {
        FormatCode::Text
    }
}

/// Encode `value` with the codec registered for `oid`, preferring binary.
pub fn encode(oid: Oid, value: &Value) -> Result<Encoded> {
    let codec = lookup(oid).ok_or_else(|| Error::Encode(format!("no codec for oid {oid}")))?;
    let (format, encoder) = match (codec.encode_binary, codec.encode_text) {
        (Some(encoder), _) => (FormatCode::Binary, encoder),
        (None, Some(encoder)) => (FormatCode::Text, encoder),
        (None, None) => {
            return Err(Error::Encode(format!("{} values cannot be sent", codec.name)));
        }
    };
    let mut bytes = Vec::new();
    encoder(value, &mut bytes)?;
    Ok(Encoded {
        oid,
        format,
        bytes: Some(bytes),
    })
}

/// Decode a non-NULL payload. Unregistered oids pass through as text.
pub fn decode(oid: Oid, format: FormatCode, bytes: &[u8]) -> Result<Value> {
    match (lookup(oid), format) {
        (Some(codec), FormatCode::Text) => (codec.decode_text)(oid, bytes),
        (Some(codec), FormatCode::Binary) => match codec.decode_binary {
            Some(decoder) => decoder(oid, bytes),
            None => Err(Error::Decode(format!(
                "no binary decoder for {}",
                codec.name
            ))),
        },
        (None, FormatCode::Text) => Ok(Value::Unknown {
            oid,
            text: utf8(bytes)?.to_string(),
        }),
        (None, FormatCode::Binary) => Err(Error::Decode(format!(
            "no binary decoder for oid {oid}"
        ))),
    }
}
