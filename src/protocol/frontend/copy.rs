//! COPY sub-protocol, frontend side.

use crate::protocol::codec::MessageBuilder;

/// Write a CopyData message.
pub fn write_copy_data(buf: &mut Vec<u8>, data: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::COPY_DATA);
    msg.write_bytes(data);
    msg.finish();
}

/// Write a CopyDone message.
pub fn write_copy_done(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::COPY_DONE).finish();
}

/// Write a CopyFail message; the server aborts the COPY with this text.
pub fn write_copy_fail(buf: &mut Vec<u8>, reason: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::COPY_FAIL);
    msg.write_cstr(reason);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_frames() {
        let mut buf = Vec::new();
        write_copy_data(&mut buf, b"1\tx\n");
        write_copy_done(&mut buf);
        assert_eq!(buf[0], b'd');
        assert_eq!(&buf[1..5], &8_i32.to_be_bytes());
        assert_eq!(&buf[9..], &[b'c', 0, 0, 0, 4]);
    }
}
