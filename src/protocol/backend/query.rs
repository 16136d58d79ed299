//! Row-producing backend messages.

use std::mem::size_of;

use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U16 as U16BE, U32 as U32BE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr, read_i32, read_u16};
use crate::protocol::types::{FormatCode, Oid};

/// Fixed-size tail of a field description (18 bytes).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    /// Table OID (0 if not a table column)
    pub table_oid: U32BE,
    /// Column attribute number (0 if not a table column)
    pub column_id: I16BE,
    /// Data type OID
    pub type_oid: U32BE,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: I16BE,
    /// Type modifier
    pub type_modifier: I32BE,
    /// Format code (0=text, 1=binary)
    pub format: U16BE,
}

/// One column of a RowDescription.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescription<'a> {
    pub name: &'a str,
    pub tail: &'a FieldDescriptionTail,
}

impl FieldDescription<'_> {
    pub fn type_oid(&self) -> Oid {
        self.tail.type_oid.get()
    }

    pub fn type_size(&self) -> i16 {
        self.tail.type_size.get()
    }

    pub fn type_modifier(&self) -> i32 {
        self.tail.type_modifier.get()
    }

    pub fn format(&self) -> FormatCode {
        FormatCode::from_u16(self.tail.format.get())
    }
}

/// RowDescription message.
#[derive(Debug)]
pub struct RowDescription<'a> {
    fields: Vec<FieldDescription<'a>>,
}

impl<'a> RowDescription<'a> {
    /// Parse a RowDescription message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        const TAIL_SIZE: usize = size_of::<FieldDescriptionTail>();

        let (count, mut data) = read_u16(payload)?;
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (name, rest) = read_cstr(data)?;
            let (tail, rest) = read_bytes(rest, TAIL_SIZE)?;
            let tail = FieldDescriptionTail::ref_from_bytes(tail)
                .map_err(|e| Error::Protocol(format!("FieldDescription tail: {e:?}")))?;
            fields.push(FieldDescription { name, tail });
            data = rest;
        }

        Ok(Self { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldDescription<'a>] {
        &self.fields
    }
}

/// DataRow message.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    num_columns: u16,
    columns_data: &'a [u8],
}

impl<'a> DataRow<'a> {
    /// Parse a DataRow message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (num_columns, columns_data) = read_u16(payload)?;
        Ok(Self {
            num_columns,
            columns_data,
        })
    }

    pub fn len(&self) -> usize {
        self.num_columns as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_columns == 0
    }

    /// Column values in order; `None` is SQL NULL.
    pub fn values(&self) -> Result<Vec<Option<&'a [u8]>>> {
        let mut values = Vec::with_capacity(self.len());
        let mut data = self.columns_data;
        for _ in 0..self.num_columns {
            let (len, rest) = read_i32(data)?;
            if len < 0 {
                values.push(None);
                data = rest;
            } else {
                let (value, rest) = read_bytes(rest, len as usize)?;
                values.push(Some(value));
                data = rest;
            }
        }
        Ok(values)
    }
}

/// CommandComplete message.
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    /// Command tag (e.g., "SELECT 5", "INSERT 0 1", "UPDATE 10")
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    /// Parse a CommandComplete message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self { tag })
    }

    /// Row count carried by the tag, if the command kind reports one.
    ///
    /// Servers before 9.0 send a bare `SELECT` tag, which yields `None`.
    pub fn rows_affected(&self) -> Option<u64> {
        let mut parts = self.tag.split_whitespace();
        let count = match (parts.next()?, parts.next(), parts.next()) {
            ("INSERT", Some(_oid), Some(count)) => count,
            (
                "SELECT" | "UPDATE" | "DELETE" | "COPY" | "MOVE" | "FETCH" | "MERGE",
                Some(count),
                None,
            ) => count,
            _ => return None,
        };
        count.parse().ok()
    }

    /// True for `DISCARD ALL` and `DEALLOCATE ALL`, after which the session
    /// holds no prepared statements.
    pub fn drops_statements(&self) -> bool {
        matches!(self.tag, "DISCARD ALL" | "DEALLOCATE ALL")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, type_oid: u32, format: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&0i16.to_be_bytes());
        buf.extend_from_slice(&type_oid.to_be_bytes());
        buf.extend_from_slice(&4i16.to_be_bytes());
        buf.extend_from_slice(&(-1i32).to_be_bytes());
        buf.extend_from_slice(&format.to_be_bytes());
        buf
    }

    #[test]
    fn row_description() {
        let mut payload = 2u16.to_be_bytes().to_vec();
        payload.extend(field("a", 23, 1));
        payload.extend(field("b", 25, 0));
        let desc = RowDescription::parse(&payload).unwrap();
        assert_eq!(desc.len(), 2);
        assert_eq!(desc.fields()[0].name, "a");
        assert_eq!(desc.fields()[0].type_oid(), 23);
        assert_eq!(desc.fields()[0].format(), FormatCode::Binary);
        assert_eq!(desc.fields()[1].type_oid(), 25);
    }

    #[test]
    fn truncated_row_description() {
        let mut payload = 1u16.to_be_bytes().to_vec();
        payload.extend(&field("a", 23, 1)[..6]);
        assert!(RowDescription::parse(&payload).is_err());
    }

    #[test]
    fn data_row_with_null() {
        let payload = [0, 2, 0xff, 0xff, 0xff, 0xff, 0, 0, 0, 1, b'x'];
        let row = DataRow::parse(&payload).unwrap();
        assert_eq!(row.values().unwrap(), vec![None, Some(&b"x"[..])]);

        let truncated = [0, 1, 0, 0, 0, 5, b'x'];
        assert!(DataRow::parse(&truncated).unwrap().values().is_err());
    }

    #[test]
    fn command_tags() {
        let rows = |tag| CommandComplete { tag }.rows_affected();
        assert_eq!(rows("SELECT 5"), Some(5));
        assert_eq!(rows("INSERT 0 1"), Some(1));
        assert_eq!(rows("UPDATE 10"), Some(10));
        assert_eq!(rows("COPY 3"), Some(3));
        assert_eq!(rows("SELECT"), None);
        assert_eq!(rows("CREATE TABLE"), None);

        assert!(CommandComplete { tag: "DISCARD ALL" }.drops_statements());
        assert!(CommandComplete { tag: "DEALLOCATE ALL" }.drops_statements());
        assert!(!CommandComplete { tag: "DEALLOCATE" }.drops_statements());
        assert!(!CommandComplete { tag: "DISCARD PLANS" }.drops_statements());
    }
}
