//! Sans-I/O state machines for PostgreSQL protocol.
//!
//! A state machine never touches the transport. It queues frames in the
//! [`BufferSet`](crate::buffer_set::BufferSet), consumes one received message
//! per [`StateMachine::step`], and answers with the [`Action`] its driver
//! should perform next.

pub mod action;
pub mod connection;
pub mod extended;
pub mod simple_query;

pub use action::{Action, AsyncMessage};
pub use connection::{ConnectionState, ConnectionStateMachine};
pub use extended::{ExecuteOutcome, ExecuteStateMachine, PrepareStateMachine};
pub use simple_query::SimpleQueryStateMachine;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::backend::{NoticeResponse, NotificationResponse, ParameterStatus, msg_type};
use crate::protocol::types::TransactionStatus;

/// Protocol logic for one request/response cycle.
pub trait StateMachine {
    /// Queue the opening frames and return the first action.
    fn start(&mut self, buffer_set: &mut BufferSet) -> Result<Action>;

    /// Consume the message in `buffer_set` and return the next action.
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action>;

    /// Status from the last ReadyForQuery.
    fn transaction_status(&self) -> TransactionStatus;
}

/// Parse a NoticeResponse, NotificationResponse or ParameterStatus.
pub(crate) fn parse_async_message(type_byte: u8, payload: &[u8]) -> Result<AsyncMessage> {
    match type_byte {
        msg_type::NOTICE_RESPONSE => Ok(AsyncMessage::Notice(NoticeResponse::parse(payload)?.0)),
        msg_type::NOTIFICATION_RESPONSE => {
            let notification = NotificationResponse::parse(payload)?;
            Ok(AsyncMessage::Notification {
                pid: notification.pid,
                channel: notification.channel.to_string(),
                payload: notification.payload.to_string(),
            })
        }
        msg_type::PARAMETER_STATUS => {
            let param = ParameterStatus::parse(payload)?;
            Ok(AsyncMessage::ParameterChanged {
                name: param.name.to_string(),
                value: param.value.to_string(),
            })
        }
        other => Err(unexpected(other, "async message")),
    }
}

pub(crate) fn unexpected(type_byte: u8, context: &str) -> Error {
    Error::Protocol(format!(
        "unexpected message '{}' during {context}",
        type_byte as char
    ))
}
