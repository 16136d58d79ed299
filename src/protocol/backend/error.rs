//! ErrorResponse and NoticeResponse.

use crate::error::{Error, Result, ServerError};
use crate::protocol::codec::{read_cstr, read_u8};

/// Field type codes of ErrorResponse/NoticeResponse.
pub mod field_type {
    pub const SEVERITY: u8 = b'S';
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    pub const POSITION: u8 = b'P';
    pub const INTERNAL_POSITION: u8 = b'p';
    pub const INTERNAL_QUERY: u8 = b'q';
    pub const WHERE: u8 = b'W';
    pub const SCHEMA: u8 = b's';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const DATA_TYPE: u8 = b'd';
    pub const CONSTRAINT: u8 = b'n';
    pub const FILE: u8 = b'F';
    pub const LINE: u8 = b'L';
    pub const ROUTINE: u8 = b'R';
}

fn parse_fields(payload: &[u8]) -> Result<ServerError> {
    let mut fields = ServerError::default();
    let mut data = payload;

    loop {
        let (code, rest) = read_u8(data)?;
        if code == 0 {
            break;
        }
        let (value, rest) = read_cstr(rest)?;
        data = rest;

        let slot = match code {
            field_type::SEVERITY => &mut fields.severity,
            field_type::SEVERITY_NON_LOCALIZED => &mut fields.severity_non_localized,
            field_type::CODE => &mut fields.code,
            field_type::MESSAGE => &mut fields.message,
            field_type::DETAIL => &mut fields.detail,
            field_type::HINT => &mut fields.hint,
            field_type::INTERNAL_QUERY => &mut fields.internal_query,
            field_type::WHERE => &mut fields.where_,
            field_type::SCHEMA => &mut fields.schema,
            field_type::TABLE => &mut fields.table,
            field_type::COLUMN => &mut fields.column,
            field_type::DATA_TYPE => &mut fields.data_type,
            field_type::CONSTRAINT => &mut fields.constraint,
            field_type::FILE => &mut fields.file,
            field_type::ROUTINE => &mut fields.routine,
            field_type::POSITION => {
                fields.position = value.parse().ok();
                continue;
            }
            field_type::INTERNAL_POSITION => {
                fields.internal_position = value.parse().ok();
                continue;
            }
            field_type::LINE => {
                fields.line = value.parse().ok();
                continue;
            }
            _ => {
                tracing::debug!("Unknown error field type: {}", code as char);
                continue;
            }
        };
        *slot = Some(value.to_string());
    }

    Ok(fields)
}

/// ErrorResponse message.
#[derive(Debug, Clone)]
pub struct ErrorResponse(pub ServerError);

impl ErrorResponse {
    /// Parse an ErrorResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        parse_fields(payload).map(Self)
    }

    /// Convert to an Error.
    pub fn into_error(self) -> Error {
        Error::Server(self.0)
    }
}

/// NoticeResponse message - non-fatal warning or info.
#[derive(Debug, Clone)]
pub struct NoticeResponse(pub ServerError);

impl NoticeResponse {
    /// Parse a NoticeResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        parse_fields(payload).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_and_unknown_fields() {
        let payload = b"SERROR\0VERROR\0C42P18\0\
            Mcould not determine data type of parameter $1\0P8\0Zignored\0\0";
        let err = ErrorResponse::parse(payload).unwrap().0;
        assert_eq!(err.sqlstate(), "42P18");
        assert_eq!(err.position, Some(8));
        assert_eq!(err.severity(), Some("ERROR"));
        assert_eq!(
            err.message.as_deref(),
            Some("could not determine data type of parameter $1")
        );
    }

    #[test]
    fn missing_terminator_is_a_protocol_error() {
        assert!(NoticeResponse::parse(b"SNOTICE\0").is_err());
    }
}
