//! Buffers shared between a connection and the state machine it drives.

/// Read and write buffers for one connection.
///
/// The driver fills `type_byte` and `read_buffer` with one message at a
/// time; state machines queue outgoing frames in `write_buffer`.
pub struct BufferSet {
    /// Payload of the last message read (length prefix stripped)
    pub read_buffer: Vec<u8>,
    /// Frames waiting to be written
    pub write_buffer: Vec<u8>,
    /// Type byte of the last message read
    pub type_byte: u8,
}

impl BufferSet {
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(8192),
            type_byte: 0,
        }
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}
