//! Simple query protocol.

use crate::protocol::codec::MessageBuilder;

/// Write a Query message.
pub fn write_query(buf: &mut Vec<u8>, query: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::QUERY);
    msg.write_cstr(query);
    msg.finish();
}
