//! CopyInResponse / CopyOutResponse.

use crate::error::Result;
use crate::protocol::codec::{read_u16, read_u8};
use crate::protocol::types::FormatCode;

/// CopyInResponse or CopyOutResponse; both share one layout.
#[derive(Debug, Clone)]
pub struct CopyResponse {
    /// Overall format
    pub format: FormatCode,
    /// Per-column format codes
    pub column_formats: Vec<FormatCode>,
}

impl CopyResponse {
    /// Parse a CopyInResponse/CopyOutResponse payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (format, rest) = read_u8(payload)?;
        let (count, mut rest) = read_u16(rest)?;
        let mut column_formats = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (fmt, remaining) = read_u16(rest)?;
            column_formats.push(FormatCode::from_u16(fmt));
            rest = remaining;
        }
        Ok(Self {
            format: FormatCode::from_u16(format as u16),
            column_formats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_copy_response() {
        let resp = CopyResponse::parse(&[0, 0, 2, 0, 0, 0, 0]).unwrap();
        assert_eq!(resp.format, FormatCode::Text);
        assert_eq!(resp.column_formats, vec![FormatCode::Text; 2]);
    }
}
