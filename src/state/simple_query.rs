//! Simple query protocol state machine.

use crate::buffer_set::BufferSet;
use crate::error::Result;
use crate::protocol::backend::{
    CommandComplete, CopyResponse, ErrorResponse, ReadyForQuery, msg_type,
};
use crate::protocol::frontend::write_query;
use crate::protocol::types::TransactionStatus;

use super::action::Action;
use super::{StateMachine, parse_async_message, unexpected};

/// Runs one Query message, which may hold several statements.
///
/// Result rows are skipped; the simple protocol is used for transaction
/// control and COPY. COPY FROM STDIN hands control to the driver with
/// [`Action::CopyIn`], and each CopyData of COPY TO STDOUT is surfaced as
/// [`Action::CopyOutData`].
pub struct SimpleQueryStateMachine {
    query: String,
    rows_affected: Option<u64>,
    statements_dropped: bool,
    copy_format: Option<CopyResponse>,
    error: Option<crate::error::Error>,
    transaction_status: TransactionStatus,
}

impl SimpleQueryStateMachine {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            rows_affected: None,
            statements_dropped: false,
            copy_format: None,
            error: None,
            transaction_status: TransactionStatus::Idle,
        }
    }

    /// Count from the last CommandComplete tag.
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    /// A statement of the query dropped every prepared statement.
    pub fn statements_dropped(&self) -> bool {
        self.statements_dropped
    }

    /// Formats announced by the last CopyInResponse or CopyOutResponse.
    pub fn copy_format(&self) -> Option<&CopyResponse> {
        self.copy_format.as_ref()
    }
}

impl StateMachine for SimpleQueryStateMachine {
    fn start(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();
        write_query(&mut buffer_set.write_buffer, &self.query);
        Ok(Action::WriteAndReadMessage)
    }

    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;
        match buffer_set.type_byte {
            msg_type::ROW_DESCRIPTION | msg_type::DATA_ROW | msg_type::EMPTY_QUERY_RESPONSE => {
                Ok(Action::ReadMessage)
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(payload)?;
                self.rows_affected = complete.rows_affected();
                self.statements_dropped |= complete.drops_statements();
                Ok(Action::ReadMessage)
            }
            msg_type::COPY_IN_RESPONSE => {
                self.copy_format = Some(CopyResponse::parse(payload)?);
                Ok(Action::CopyIn)
            }
            msg_type::COPY_OUT_RESPONSE => {
                self.copy_format = Some(CopyResponse::parse(payload)?);
                Ok(Action::ReadMessage)
            }
            msg_type::COPY_DATA => Ok(Action::CopyOutData),
            msg_type::COPY_DONE => Ok(Action::ReadMessage),
            msg_type::ERROR_RESPONSE => {
                // A multi-statement query stops at the first error.
                let err = ErrorResponse::parse(payload)?.into_error();
                self.error.get_or_insert(err);
                Ok(Action::ReadMessage)
            }
            msg_type::NOTICE_RESPONSE
            | msg_type::NOTIFICATION_RESPONSE
            | msg_type::PARAMETER_STATUS => {
                parse_async_message(buffer_set.type_byte, payload)
                    .map(Action::HandleAsyncMessageAndReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                self.transaction_status = ReadyForQuery::parse(payload)?.status;
                match self.error.take() {
                    Some(err) => Err(err),
                    None => Ok(Action::Finished),
                }
            }
            other => Err(unexpected(other, "simple query")),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn feed(
        sm: &mut SimpleQueryStateMachine,
        buffers: &mut BufferSet,
        type_byte: u8,
        payload: &[u8],
    ) -> Result<Action> {
        buffers.type_byte = type_byte;
        buffers.read_buffer.clear();
        buffers.read_buffer.extend_from_slice(payload);
        sm.step(buffers)
    }

    #[test]
    fn command_tag_sets_rows_affected() {
        let mut sm = SimpleQueryStateMachine::new("UPDATE t SET a = 1");
        let mut buffers = BufferSet::new();
        sm.start(&mut buffers).unwrap();
        assert_eq!(buffers.write_buffer[0], b'Q');
        feed(&mut sm, &mut buffers, b'C', b"UPDATE 3\0").unwrap();
        assert!(matches!(feed(&mut sm, &mut buffers, b'Z', b"T").unwrap(), Action::Finished));
        assert_eq!(sm.rows_affected(), Some(3));
        assert_eq!(sm.transaction_status(), TransactionStatus::InTransaction);
    }

    #[test]
    fn discard_all_is_noticed() {
        let mut sm = SimpleQueryStateMachine::new("DISCARD ALL; SELECT 1");
        let mut buffers = BufferSet::new();
        sm.start(&mut buffers).unwrap();
        feed(&mut sm, &mut buffers, b'C', b"DISCARD ALL\0").unwrap();
        feed(&mut sm, &mut buffers, b'C', b"SELECT 1\0").unwrap();
        feed(&mut sm, &mut buffers, b'Z', b"I").unwrap();
        assert!(sm.statements_dropped());
        assert_eq!(sm.rows_affected(), Some(1));
    }

    #[test]
    fn copy_out_surfaces_data() {
        let mut sm = SimpleQueryStateMachine::new("COPY t TO STDOUT");
        let mut buffers = BufferSet::new();
        sm.start(&mut buffers).unwrap();
        let action = feed(&mut sm, &mut buffers, b'H', &[0, 0, 1, 0, 0]).unwrap();
        assert!(matches!(action, Action::ReadMessage));
        assert!(matches!(feed(&mut sm, &mut buffers, b'd', b"1\n").unwrap(), Action::CopyOutData));
        assert_eq!(buffers.read_buffer, b"1\n");
        feed(&mut sm, &mut buffers, b'c', b"").unwrap();
        feed(&mut sm, &mut buffers, b'C', b"COPY 1\0").unwrap();
        feed(&mut sm, &mut buffers, b'Z', b"I").unwrap();
        assert_eq!(sm.rows_affected(), Some(1));
        assert_eq!(sm.copy_format().map(|f| f.column_formats.len()), Some(1));
    }

    #[test]
    fn copy_in_hands_over() {
        let mut sm = SimpleQueryStateMachine::new("COPY t FROM STDIN");
        let mut buffers = BufferSet::new();
        sm.start(&mut buffers).unwrap();
        assert!(matches!(feed(&mut sm, &mut buffers, b'G', &[0, 0, 0]).unwrap(), Action::CopyIn));
    }

    #[test]
    fn error_is_reported_after_ready() {
        let mut sm = SimpleQueryStateMachine::new("COMMIT; SELECT 1/0");
        let mut buffers = BufferSet::new();
        sm.start(&mut buffers).unwrap();
        feed(&mut sm, &mut buffers, b'C', b"COMMIT\0").unwrap();
        feed(&mut sm, &mut buffers, b'E', b"SERROR\0C22012\0Mdivision by zero\0\0").unwrap();
        let err = feed(&mut sm, &mut buffers, b'Z', b"I").unwrap_err();
        assert!(matches!(err, Error::Server(_)));
        assert_eq!(err.sqlstate(), Some("22012"));
    }
}
