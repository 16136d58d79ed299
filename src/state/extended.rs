//! Extended query protocol state machines.
//!
//! A statement is prepared by [`PrepareStateMachine`] and run by
//! [`ExecuteStateMachine`]. Both end every request with Sync, so a server
//! error is always followed by ReadyForQuery; the machines drain up to it
//! and only then report the error, leaving the connection usable.

use tracing::debug;

use crate::Row;
use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::backend::{
    CommandComplete, DataRow, ErrorResponse, ParameterDescription, ReadyForQuery, RowDescription,
    msg_type,
};
use crate::protocol::frontend::{
    write_bind, write_close_portal, write_close_statement, write_copy_fail, write_describe_portal,
    write_describe_statement, write_execute, write_parse, write_sync,
};
use crate::protocol::types::{Oid, TransactionStatus};
use crate::statement::{ColumnDescription, PreparedStatement};
use crate::types::{Encoded, Value};

use super::action::Action;
use super::{StateMachine, parse_async_message, unexpected};

/// Route messages common to every extended-protocol cycle.
///
/// Returns `None` when the message is specific to the caller.
fn step_common(
    buffer_set: &BufferSet,
    error: &mut Option<Error>,
    status: &mut TransactionStatus,
) -> Option<Result<Action>> {
    let payload = &buffer_set.read_buffer;
    match buffer_set.type_byte {
        msg_type::ERROR_RESPONSE => Some(ErrorResponse::parse(payload).map(|response| {
            if error.is_none() {
                *error = Some(response.into_error());
            }
            Action::ReadMessage
        })),
        msg_type::NOTICE_RESPONSE
        | msg_type::NOTIFICATION_RESPONSE
        | msg_type::PARAMETER_STATUS => Some(
            parse_async_message(buffer_set.type_byte, payload)
                .map(Action::HandleAsyncMessageAndReadMessage),
        ),
        msg_type::READY_FOR_QUERY => Some(ReadyForQuery::parse(payload).and_then(|ready| {
            *status = ready.status;
            match error.take() {
                Some(err) => Err(err),
                None => Ok(Action::Finished),
            }
        })),
        _ => None,
    }
}

fn write_closes(buf: &mut Vec<u8>, names: &[String]) {
    for name in names {
        debug!(statement = %name, "closing statement");
        write_close_statement(buf, name);
    }
}

/// Parse + Describe(statement) + Sync.
pub struct PrepareStateMachine {
    name: String,
    query: String,
    param_oids: Vec<Oid>,
    close: Vec<String>,
    resolved_oids: Option<Vec<Oid>>,
    columns: Option<Vec<ColumnDescription>>,
    error: Option<Error>,
    transaction_status: TransactionStatus,
}

impl PrepareStateMachine {
    /// `close` lists statements to close in the same round trip.
    pub fn new(name: String, query: String, param_oids: Vec<Oid>, close: Vec<String>) -> Self {
        Self {
            name,
            query,
            param_oids,
            close,
            resolved_oids: None,
            columns: None,
            error: None,
            transaction_status: TransactionStatus::Idle,
        }
    }

    /// The prepared statement, with parameter types as the server resolved them.
    pub fn into_statement(self) -> PreparedStatement {
        PreparedStatement {
            name: self.name,
            query: self.query,
            param_oids: self.resolved_oids.unwrap_or(self.param_oids),
            columns: self.columns,
        }
    }
}

impl StateMachine for PrepareStateMachine {
    fn start(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let buf = &mut buffer_set.write_buffer;
        buf.clear();
        write_closes(buf, &self.close);
        write_parse(buf, &self.name, &self.query, &self.param_oids);
        write_describe_statement(buf, &self.name);
        write_sync(buf);
        Ok(Action::WriteAndReadMessage)
    }

    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if let Some(result) =
            step_common(buffer_set, &mut self.error, &mut self.transaction_status)
        {
            return result;
        }
        let payload = &buffer_set.read_buffer;
        match buffer_set.type_byte {
            msg_type::CLOSE_COMPLETE | msg_type::PARSE_COMPLETE => {}
            msg_type::PARAMETER_DESCRIPTION => {
                self.resolved_oids = Some(ParameterDescription::parse(payload)?.into_oids());
            }
            msg_type::ROW_DESCRIPTION => {
                let desc = RowDescription::parse(payload)?;
                self.columns = Some(ColumnDescription::from_row_description(&desc));
            }
            msg_type::NO_DATA => self.columns = None,
            other => return Err(unexpected(other, "prepare")),
        }
        Ok(Action::ReadMessage)
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}

/// What an [`ExecuteStateMachine`] observed.
#[derive(Debug, Default)]
pub struct ExecuteOutcome {
    /// Decoded rows, in server order
    pub rows: Vec<Row>,
    /// Count from the CommandComplete tag, if the command reports one
    pub rows_affected: Option<u64>,
    /// The portal hit `max_rows` and has more rows
    pub suspended: bool,
    /// Result columns of the portal; `None` if it returns no rows
    pub columns: Option<Vec<ColumnDescription>>,
    /// The portal was described in this cycle
    pub described: bool,
    /// The command dropped every prepared statement of the session
    pub statements_dropped: bool,
}

/// Bind + Describe(portal) + Execute + Sync, or Execute + Sync to resume a
/// suspended portal.
///
/// Rows are decoded with the columns from Describe(portal), which reflect
/// the result formats actually requested in Bind.
pub struct ExecuteStateMachine {
    request: Vec<u8>,
    outcome: ExecuteOutcome,
    error: Option<Error>,
    transaction_status: TransactionStatus,
}

impl ExecuteStateMachine {
    /// Bind `params` to `statement` as `portal` and fetch up to `max_rows`
    /// rows (`0` for all). A named portal left open by an earlier execute in
    /// the same transaction is closed first.
    pub fn bind(
        portal: &str,
        statement: &PreparedStatement,
        params: &[Encoded],
        max_rows: u32,
        close: &[String],
    ) -> Self {
        let mut request = Vec::new();
        write_closes(&mut request, close);
        if !portal.is_empty() {
            write_close_portal(&mut request, portal);
        }
        write_bind(&mut request, portal, &statement.name, params, &statement.result_formats());
        write_describe_portal(&mut request, portal);
        write_execute(&mut request, portal, max_rows);
        write_sync(&mut request);
        Self::with_request(request, None)
    }

    /// Fetch the next `max_rows` rows of a suspended portal.
    pub fn resume(portal: &str, columns: Vec<ColumnDescription>, max_rows: u32) -> Self {
        let mut request = Vec::new();
        write_execute(&mut request, portal, max_rows);
        write_sync(&mut request);
        Self::with_request(request, Some(columns))
    }

    fn with_request(request: Vec<u8>, columns: Option<Vec<ColumnDescription>>) -> Self {
        Self {
            request,
            outcome: ExecuteOutcome {
                columns,
                ..ExecuteOutcome::default()
            },
            error: None,
            transaction_status: TransactionStatus::Idle,
        }
    }

    pub fn into_outcome(self) -> ExecuteOutcome {
        self.outcome
    }

    fn decode_row(&self, payload: &[u8]) -> Result<Row> {
        let columns = self
            .outcome
            .columns
            .as_deref()
            .ok_or_else(|| Error::Protocol("DataRow without a row description".into()))?;
        let values = DataRow::parse(payload)?.values()?;
        if values.len() != columns.len() {
            return Err(Error::Protocol(format!(
                "DataRow has {} values for {} columns",
                values.len(),
                columns.len()
            )));
        }
        values
            .into_iter()
            .zip(columns)
            .map(|(bytes, column)| Value::decode(column.type_oid, column.format, bytes))
            .collect()
    }
}

impl StateMachine for ExecuteStateMachine {
    fn start(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();
        buffer_set.write_buffer.append(&mut self.request);
        Ok(Action::WriteAndReadMessage)
    }

    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if let Some(result) =
            step_common(buffer_set, &mut self.error, &mut self.transaction_status)
        {
            return result;
        }
        let payload = &buffer_set.read_buffer;
        match buffer_set.type_byte {
            msg_type::CLOSE_COMPLETE
            | msg_type::BIND_COMPLETE
            | msg_type::EMPTY_QUERY_RESPONSE => {}
            msg_type::ROW_DESCRIPTION => {
                let desc = RowDescription::parse(payload)?;
                self.outcome.columns = Some(ColumnDescription::from_row_description(&desc));
                self.outcome.described = true;
            }
            msg_type::NO_DATA => {
                self.outcome.columns = None;
                self.outcome.described = true;
            }
            msg_type::DATA_ROW => {
                // After a decode failure the remaining rows are drained unread.
                if self.error.is_none() {
                    match self.decode_row(payload) {
                        Ok(row) => self.outcome.rows.push(row),
                        Err(err) => self.error = Some(err),
                    }
                }
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(payload)?;
                self.outcome.rows_affected = complete.rows_affected();
                self.outcome.statements_dropped = complete.drops_statements();
            }
            msg_type::PORTAL_SUSPENDED => self.outcome.suspended = true,
            msg_type::COPY_IN_RESPONSE => {
                // Sync is ignored in copy-in mode, so it is sent again.
                self.error.get_or_insert(Error::InvalidUsage(
                    "COPY FROM STDIN must go through copy_in".into(),
                ));
                let buf = &mut buffer_set.write_buffer;
                buf.clear();
                write_copy_fail(buf, "COPY FROM STDIN is not supported by execute");
                write_sync(buf);
                return Ok(Action::WriteAndReadMessage);
            }
            msg_type::COPY_OUT_RESPONSE | msg_type::COPY_DATA | msg_type::COPY_DONE => {
                debug!("discarding COPY TO STDOUT data from execute");
            }
            other => return Err(unexpected(other, "execute")),
        }
        Ok(Action::ReadMessage)
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::FormatCode;

    fn feed<S: StateMachine>(
        sm: &mut S,
        buffers: &mut BufferSet,
        type_byte: u8,
        payload: &[u8],
    ) -> Result<Action> {
        buffers.type_byte = type_byte;
        buffers.read_buffer.clear();
        buffers.read_buffer.extend_from_slice(payload);
        sm.step(buffers)
    }

    fn row_description(columns: &[(&str, Oid, u16)]) -> Vec<u8> {
        let mut payload = (columns.len() as u16).to_be_bytes().to_vec();
        for (name, oid, format) in columns {
            payload.extend_from_slice(name.as_bytes());
            payload.push(0);
            payload.extend_from_slice(&0_u32.to_be_bytes());
            payload.extend_from_slice(&0_i16.to_be_bytes());
            payload.extend_from_slice(&oid.to_be_bytes());
            payload.extend_from_slice(&4_i16.to_be_bytes());
            payload.extend_from_slice(&(-1_i32).to_be_bytes());
            payload.extend_from_slice(&format.to_be_bytes());
        }
        payload
    }

    fn data_row(values: &[Option<&[u8]>]) -> Vec<u8> {
        let mut payload = (values.len() as u16).to_be_bytes().to_vec();
        for value in values {
            match value {
                Some(bytes) => {
                    payload.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    payload.extend_from_slice(bytes);
                }
                None => payload.extend_from_slice(&(-1_i32).to_be_bytes()),
            }
        }
        payload
    }

    fn int4_statement() -> PreparedStatement {
        PreparedStatement {
            name: "zc_stmt_1".into(),
            query: "SELECT $1::int4".into(),
            param_oids: vec![23],
            columns: Some(vec![ColumnDescription {
                name: "n".into(),
                type_oid: 23,
                type_size: 4,
                type_modifier: -1,
                format: FormatCode::Text,
            }]),
        }
    }

    #[test]
    fn prepare_records_server_types() {
        let mut sm = PrepareStateMachine::new(
            "zc_stmt_2".into(),
            "SELECT $1".into(),
            vec![0],
            vec!["zc_stmt_1".into()],
        );
        let mut buffers = BufferSet::new();
        sm.start(&mut buffers).unwrap();
        let frames: Vec<u8> = buffers.write_buffer.clone();
        assert_eq!(frames[0], b'C');
        assert!(frames.contains(&b'P'));
        assert_eq!(&frames[frames.len() - 5..], &[b'S', 0, 0, 0, 4]);

        let mut param_desc = 1_u16.to_be_bytes().to_vec();
        param_desc.extend_from_slice(&25_u32.to_be_bytes());
        for (type_byte, payload) in [
            (b'3', Vec::new()),
            (b'1', Vec::new()),
            (b't', param_desc),
            (b'T', row_description(&[("?column?", 25, 0)])),
        ] {
            let action = feed(&mut sm, &mut buffers, type_byte, &payload).unwrap();
            assert!(matches!(action, Action::ReadMessage));
        }
        assert!(matches!(feed(&mut sm, &mut buffers, b'Z', b"I").unwrap(), Action::Finished));

        let stmt = sm.into_statement();
        assert_eq!(stmt.param_oids, vec![25]);
        assert_eq!(stmt.column_oids(), vec![25]);
    }

    #[test]
    fn prepare_error_waits_for_ready() {
        let mut sm = PrepareStateMachine::new("".into(), "SELEC".into(), vec![], vec![]);
        let mut buffers = BufferSet::new();
        sm.start(&mut buffers).unwrap();
        let error = b"SERROR\0C42601\0Msyntax error\0\0";
        let action = feed(&mut sm, &mut buffers, b'E', error).unwrap();
        assert!(matches!(action, Action::ReadMessage));
        let err = feed(&mut sm, &mut buffers, b'Z', b"I").unwrap_err();
        assert_eq!(err.sqlstate(), Some("42601"));
        assert_eq!(sm.transaction_status(), TransactionStatus::Idle);
    }

    #[test]
    fn execute_decodes_rows_with_portal_columns() {
        let stmt = int4_statement();
        let params = [Value::Int(7).encode().unwrap()];
        let mut sm = ExecuteStateMachine::bind("zc_portal_1", &stmt, &params, 100, &[]);
        let mut buffers = BufferSet::new();
        sm.start(&mut buffers).unwrap();
        // Close(portal) precedes Bind.
        assert_eq!(buffers.write_buffer[0], b'C');
        assert_eq!(buffers.write_buffer[5], b'P');

        feed(&mut sm, &mut buffers, b'3', b"").unwrap();
        feed(&mut sm, &mut buffers, b'2', b"").unwrap();
        feed(&mut sm, &mut buffers, b'T', &row_description(&[("n", 23, 1)])).unwrap();
        feed(&mut sm, &mut buffers, b'D', &data_row(&[Some(&7_i32.to_be_bytes())])).unwrap();
        feed(&mut sm, &mut buffers, b'D', &data_row(&[None])).unwrap();
        feed(&mut sm, &mut buffers, b'C', b"SELECT 2\0").unwrap();
        assert!(matches!(feed(&mut sm, &mut buffers, b'Z', b"T").unwrap(), Action::Finished));
        assert_eq!(sm.transaction_status(), TransactionStatus::InTransaction);

        let outcome = sm.into_outcome();
        assert!(outcome.described);
        assert!(!outcome.suspended);
        assert_eq!(outcome.rows, vec![vec![Value::Int(7)], vec![Value::Null]]);
        assert_eq!(outcome.rows_affected, Some(2));
    }

    #[test]
    fn suspended_portal_resumes() {
        let stmt = int4_statement();
        let params = [Value::Int(1).encode().unwrap()];
        let mut sm = ExecuteStateMachine::bind("p", &stmt, &params, 1, &[]);
        let mut buffers = BufferSet::new();
        sm.start(&mut buffers).unwrap();
        feed(&mut sm, &mut buffers, b'2', b"").unwrap();
        feed(&mut sm, &mut buffers, b'T', &row_description(&[("n", 23, 0)])).unwrap();
        feed(&mut sm, &mut buffers, b'D', &data_row(&[Some(b"1")])).unwrap();
        feed(&mut sm, &mut buffers, b's', b"").unwrap();
        feed(&mut sm, &mut buffers, b'Z', b"T").unwrap();
        let outcome = sm.into_outcome();
        assert!(outcome.suspended);
        assert_eq!(outcome.rows_affected, None);

        let columns = outcome.columns.unwrap();
        let mut sm = ExecuteStateMachine::resume("p", columns, 1);
        sm.start(&mut buffers).unwrap();
        assert_eq!(buffers.write_buffer[0], b'E');
        feed(&mut sm, &mut buffers, b'D', &data_row(&[Some(b"2")])).unwrap();
        feed(&mut sm, &mut buffers, b'C', b"SELECT 1\0").unwrap();
        feed(&mut sm, &mut buffers, b'Z', b"T").unwrap();
        let outcome = sm.into_outcome();
        assert!(!outcome.described);
        assert_eq!(outcome.rows, vec![vec![Value::Int(2)]]);
    }

    #[test]
    fn copy_in_through_execute_fails() {
        let stmt = PreparedStatement {
            columns: None,
            ..int4_statement()
        };
        let mut sm = ExecuteStateMachine::bind("", &stmt, &[], 0, &[]);
        let mut buffers = BufferSet::new();
        sm.start(&mut buffers).unwrap();
        feed(&mut sm, &mut buffers, b'2', b"").unwrap();
        feed(&mut sm, &mut buffers, b'n', b"").unwrap();
        let action = feed(&mut sm, &mut buffers, b'G', &[0, 0, 0]).unwrap();
        assert!(matches!(action, Action::WriteAndReadMessage));
        assert_eq!(buffers.write_buffer[0], b'f');
        feed(&mut sm, &mut buffers, b'E', b"SERROR\0C57014\0MCOPY from stdin failed\0\0").unwrap();
        let err = feed(&mut sm, &mut buffers, b'Z', b"I").unwrap_err();
        assert!(matches!(err, Error::InvalidUsage(_)));
    }
}
