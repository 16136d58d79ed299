//! What a state machine asks its driver to do next.

use crate::error::ServerError;

/// I/O requested by a state machine.
///
/// After performing it, the driver calls `step()` again with the next
/// message in the buffer set, unless the action is [`Action::Finished`].
#[derive(Debug)]
pub enum Action {
    /// Read the next message.
    ReadMessage,

    /// Write and flush `write_buffer`, then read the next message.
    WriteAndReadMessage,

    /// Stash the message, then read the next one.
    HandleAsyncMessageAndReadMessage(AsyncMessage),

    /// The server is in COPY IN mode: stream the caller's source as CopyData
    /// frames, finish with CopyDone (or CopyFail), then read the next message.
    CopyIn,

    /// `read_buffer` holds one CopyData payload for the caller's sink.
    /// Hand it over, then read the next message.
    CopyOutData,

    /// The request cycle is complete.
    Finished,
}

/// Message the server may send at any point of a request cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncMessage {
    /// LISTEN/NOTIFY delivery
    Notification {
        /// Process id of the notifying backend
        pid: u32,
        channel: String,
        payload: String,
    },

    /// Non-fatal notice or warning
    Notice(ServerError),

    /// A reported server parameter changed
    ParameterChanged { name: String, value: String },
}
