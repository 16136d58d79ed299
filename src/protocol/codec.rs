//! Framing primitives shared by frontend and backend messages.
//!
//! Every integer on the wire is big-endian. Readers return the decoded value
//! and the unread remainder so parsers can thread a slice through a payload.

use zerocopy::FromBytes;
use zerocopy::byteorder::big_endian::{I16, I32, I64, U16, U32};

use crate::error::{Error, Result};

/// Split `len` bytes off the front of `data`.
#[inline]
pub fn read_bytes(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    data.split_at_checked(len).ok_or_else(|| {
        Error::Protocol(format!(
            "buffer too short: {} < {}",
            data.len(),
            len
        ))
    })
}

/// Read 1-byte unsigned integer.
#[inline]
pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((&byte, rest)) => Ok((byte, rest)),
        None => Err(Error::Protocol("read_u8: empty buffer".into())),
    }
}

macro_rules! be_reader {
    ($name:ident, $native:ty, $wire:ty) => {
        #[doc = concat!("Read a big-endian `", stringify!($native), "`.")]
        #[inline]
        pub fn $name(data: &[u8]) -> Result<($native, &[u8])> {
            let (value, rest) = <$wire>::read_from_prefix(data).map_err(|_| {
                Error::Protocol(format!(
                    "{}: buffer too short: {}",
                    stringify!($name),
                    data.len()
                ))
            })?;
            Ok((value.get(), rest))
        }
    };
}

be_reader!(read_i16, i16, I16);
be_reader!(read_u16, u16, U16);
be_reader!(read_i32, i32, I32);
be_reader!(read_u32, u32, U32);
be_reader!(read_i64, i64, I64);

/// Read a null-terminated string (without the terminator).
#[inline]
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    match memchr::memchr(0, data) {
        Some(pos) => Ok((&data[..pos], &data[pos + 1..])),
        None => Err(Error::Protocol(
            "read_cstring: no null terminator found".into(),
        )),
    }
}

/// Read a null-terminated UTF-8 string.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    let s = simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Protocol(format!("read_cstr: invalid UTF-8: {e}")))?;
    Ok((s, rest))
}

/// Write a length-prefixed value: `-1` for NULL, else the byte count then the bytes.
pub fn write_nullable(out: &mut Vec<u8>, value: Option<&[u8]>) {
    match value {
        None => out.extend_from_slice(&(-1_i32).to_be_bytes()),
        Some(bytes) => {
            out.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
            out.extend_from_slice(bytes);
        }
    }
}

/// Builds one frame in place and back-patches its length on `finish`.
///
/// Frame layout: type byte (not counted), 4-byte length (counts itself), payload.
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start a tagged message.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        Self::new_startup(buf)
    }

    /// Start an untagged message (StartupMessage, SSLRequest).
    pub fn new_startup(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        Self { buf, start }
    }

    /// Underlying buffer, for payload writers that encode directly.
    pub fn buf(&mut self) -> &mut Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Write a null-terminated string.
    pub fn write_cstr(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// Fill in the length field.
    pub fn finish(self) {
        let len = (self.buf.len() - self.start) as i32;
        self.buf[self.start..self.start + 4].copy_from_slice(&len.to_be_bytes());
    }
}
