//! Extended query protocol messages.

use crate::protocol::codec::{MessageBuilder, write_nullable};
use crate::protocol::types::{FormatCode, Oid};
use crate::types::Encoded;

/// Most parameters one statement can carry; counts are sent as Int16.
pub const MAX_PARAMETERS: usize = i16::MAX as usize;

/// Write a Parse message.
///
/// `param_oids` may contain `0` for parameters whose type the server infers.
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_i16(param_oids.len() as i16);
    for &oid in param_oids {
        msg.write_i32(oid as i32);
    }
    msg.finish();
}

/// Write a Bind message.
///
/// Each parameter carries its own format code; NULLs are sent with length -1.
pub fn write_bind(
    buf: &mut Vec<u8>,
    portal: &str,
    statement: &str,
    params: &[Encoded],
    result_formats: &[FormatCode],
) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);
    msg.write_cstr(portal);
    msg.write_cstr(statement);

    msg.write_i16(params.len() as i16);
    for param in params {
        msg.write_i16(param.format as i16);
    }

    msg.write_i16(params.len() as i16);
    for param in params {
        write_nullable(msg.buf(), param.bytes.as_deref());
    }

    msg.write_i16(result_formats.len() as i16);
    for &fmt in result_formats {
        msg.write_i16(fmt as i16);
    }
    msg.finish();
}

/// Write an Execute message. `max_rows == 0` means no limit.
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_i32(max_rows as i32);
    msg.finish();
}

fn write_target(buf: &mut Vec<u8>, type_byte: u8, target: u8, name: &str) {
    let mut msg = MessageBuilder::new(buf, type_byte);
    msg.write_u8(target);
    msg.write_cstr(name);
    msg.finish();
}

pub fn write_describe_statement(buf: &mut Vec<u8>, name: &str) {
    write_target(buf, super::msg_type::DESCRIBE, b'S', name);
}

pub fn write_describe_portal(buf: &mut Vec<u8>, name: &str) {
    write_target(buf, super::msg_type::DESCRIBE, b'P', name);
}

pub fn write_close_statement(buf: &mut Vec<u8>, name: &str) {
    write_target(buf, super::msg_type::CLOSE, b'S', name);
}

pub fn write_close_portal(buf: &mut Vec<u8>, name: &str) {
    write_target(buf, super::msg_type::CLOSE, b'P', name);
}

/// Write a Sync message, which ends the request and yields a ReadyForQuery.
pub fn write_sync(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::SYNC).finish();
}
