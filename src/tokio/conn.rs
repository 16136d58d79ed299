//! Asynchronous PostgreSQL connection.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result, ServerError};
use crate::opts::Opts;
use crate::paramstyle::{self, ParamStyle};
use crate::protocol::frontend::{
    MAX_PARAMETERS, write_copy_data, write_copy_done, write_copy_fail, write_terminate,
};
use crate::protocol::types::{Oid, TransactionStatus};
use crate::state::{
    Action, AsyncMessage, ConnectionStateMachine, ExecuteOutcome, ExecuteStateMachine,
    PrepareStateMachine, SimpleQueryStateMachine, StateMachine,
};
use crate::statement::{ColumnDescription, PreparedStatement, StatementCache};
use crate::types::Encoded;

use super::cursor::Cursor;
use super::stream::{Stream, Transport};

/// Notices kept for [`Connection::notices`]; older ones are dropped.
const MAX_NOTICES: usize = 100;

/// CopyData chunk size for COPY FROM STDIN.
const COPY_CHUNK: usize = 64 * 1024;

/// A LISTEN/NOTIFY delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Process id of the notifying backend
    pub pid: u32,
    pub channel: String,
    pub payload: String,
}

/// Caller-side end of a COPY.
pub(crate) enum CopyStream<'a> {
    None,
    In(&'a mut (dyn AsyncRead + Unpin + Send)),
    Out(&'a mut (dyn AsyncWrite + Unpin + Send)),
}

/// Asynchronous PostgreSQL connection.
///
/// Cheap to clone; clones share one session. Each request/response cycle
/// holds the session lock, so cursors on one connection interleave only
/// between complete cycles.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<Mutex<Inner>>,
}

pub(crate) struct Inner {
    stream: Stream,
    buffer_set: BufferSet,
    opts: Opts,
    statements: StatementCache,
    /// Last unnamed statement and the oids it was parsed with, valid until
    /// the next Parse or simple query
    unnamed: Option<(Vec<Oid>, PreparedStatement)>,
    transaction_status: TransactionStatus,
    backend_key: Option<(u32, u32)>,
    server_params: HashMap<String, String>,
    notifications: VecDeque<Notification>,
    notices: VecDeque<ServerError>,
    portal_counter: u64,
    is_broken: bool,
    is_closed: bool,
}

impl Connection {
    /// Run startup and authentication over `transport`.
    ///
    /// SSL, if wanted, is negotiated on the raw channel beforehand with
    /// [`negotiate_ssl`](super::negotiate_ssl).
    pub async fn connect<T: Transport + 'static>(transport: T, opts: Opts) -> Result<Self> {
        if opts.row_cache_size == 0 || opts.row_cache_size > i32::MAX as usize {
            return Err(Error::InvalidUsage(format!(
                "row_cache_size out of range: {}",
                opts.row_cache_size
            )));
        }

        let mut inner = Inner {
            stream: Stream::new(Box::new(transport)),
            buffer_set: BufferSet::new(),
            statements: StatementCache::new(opts.statement_cache_size),
            opts: opts.clone(),
            unnamed: None,
            transaction_status: TransactionStatus::Idle,
            backend_key: None,
            server_params: HashMap::new(),
            notifications: VecDeque::new(),
            notices: VecDeque::new(),
            portal_counter: 0,
            is_broken: false,
            is_closed: false,
        };

        let mut state_machine = ConnectionStateMachine::new(opts);
        inner.run(&mut state_machine, CopyStream::None).await?;
        inner.backend_key = state_machine.backend_key();
        inner.server_params.extend(state_machine.take_server_params());
        debug!(
            server_version = inner.server_params.get("server_version").map(String::as_str),
            "connected"
        );

        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    /// A new cursor on this connection.
    pub async fn cursor(&self) -> Result<Cursor> {
        let portal = {
            let mut inner = self.inner.lock().await;
            inner.check_usable()?;
            inner.portal_counter += 1;
            format!("zc_portal_{}", inner.portal_counter)
        };
        Ok(Cursor::new(self.clone(), portal))
    }

    pub async fn commit(&self) -> Result<()> {
        self.inner.lock().await.simple_query("COMMIT", CopyStream::None).await?;
        Ok(())
    }

    pub async fn rollback(&self) -> Result<()> {
        self.inner.lock().await.simple_query("ROLLBACK", CopyStream::None).await?;
        Ok(())
    }

    /// Send Terminate. Every later operation fails.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.is_closed {
            return Ok(());
        }
        inner.is_closed = true;
        if inner.is_broken {
            return Ok(());
        }
        inner.buffer_set.write_buffer.clear();
        write_terminate(&mut inner.buffer_set.write_buffer);
        let Inner { stream, buffer_set, .. } = &mut *inner;
        stream.send(&buffer_set.write_buffer).await
    }

    /// Drain queued LISTEN/NOTIFY deliveries, oldest first.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.inner.lock().await.notifications.drain(..).collect()
    }

    /// Drain queued server notices, oldest first.
    pub async fn notices(&self) -> Vec<ServerError> {
        self.inner.lock().await.notices.drain(..).collect()
    }

    /// `server_version` as reported at startup.
    pub async fn server_version(&self) -> Option<String> {
        self.server_parameter("server_version").await
    }

    /// A parameter reported by ParameterStatus.
    pub async fn server_parameter(&self, name: &str) -> Option<String> {
        self.inner.lock().await.server_params.get(name).cloned()
    }

    /// Process id of the backend serving this session.
    pub async fn backend_pid(&self) -> Option<u32> {
        self.inner.lock().await.backend_key.map(|(pid, _)| pid)
    }

    pub async fn transaction_status(&self) -> TransactionStatus {
        self.inner.lock().await.transaction_status
    }

    pub async fn autocommit(&self) -> bool {
        self.inner.lock().await.opts.autocommit
    }

    pub async fn set_autocommit(&self, autocommit: bool) {
        self.inner.lock().await.opts.autocommit = autocommit;
    }

    /// True once an I/O, protocol or fatal server error broke the session.
    pub async fn is_broken(&self) -> bool {
        self.inner.lock().await.is_broken
    }
}

impl Inner {
    pub(crate) fn check_usable(&self) -> Result<()> {
        if self.is_closed {
            Err(Error::InvalidUsage("connection is closed".into()))
        } else if self.is_broken {
            Err(Error::ConnectionBroken)
        } else {
            Ok(())
        }
    }

    pub(crate) fn row_cache_size(&self) -> usize {
        self.opts.row_cache_size
    }

    pub(crate) fn paramstyle(&self) -> ParamStyle {
        self.opts.paramstyle.unwrap_or_else(paramstyle::paramstyle)
    }

    pub(crate) fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Open a transaction when autocommit is off and none is open.
    pub(crate) async fn begin_if_needed(&mut self) -> Result<()> {
        if !self.opts.autocommit && self.transaction_status == TransactionStatus::Idle {
            self.simple_query("BEGIN TRANSACTION", CopyStream::None).await?;
        }
        Ok(())
    }

    /// Run a Query message; returns the count from the last command tag.
    pub(crate) async fn simple_query(
        &mut self,
        query: &str,
        copy: CopyStream<'_>,
    ) -> Result<Option<u64>> {
        self.check_usable()?;
        self.unnamed = None;
        let mut state_machine = SimpleQueryStateMachine::new(query);
        let result = self.run(&mut state_machine, copy).await;
        if state_machine.statements_dropped() {
            self.forget_statements();
        }
        result?;
        Ok(state_machine.rows_affected())
    }

    /// The server dropped every prepared statement of the session.
    fn forget_statements(&mut self) {
        debug!("server dropped all prepared statements");
        self.statements.clear();
        self.unnamed = None;
    }

    /// Prepare (or reuse) a statement for `query` with parameters of `param_oids`.
    async fn statement(&mut self, query: &str, param_oids: &[Oid]) -> Result<PreparedStatement> {
        let named = self.opts.prepared && self.statements.is_enabled();
        if named {
            if let Some(statement) = self.statements.get(query, param_oids) {
                return Ok(statement.clone());
            }
        } else if let Some((_, statement)) = self
            .unnamed
            .as_ref()
            .filter(|(oids, s)| s.query == query && oids == param_oids)
        {
            return Ok(statement.clone());
        }

        let name = if named {
            self.statements.next_name()
        } else {
            String::new()
        };
        let close = self.statements.take_pending_close();
        let mut state_machine =
            PrepareStateMachine::new(name, query.to_string(), param_oids.to_vec(), close);
        self.unnamed = None;
        self.run(&mut state_machine, CopyStream::None).await?;
        let statement = state_machine.into_statement();

        // Keyed by the oids we bind with, whatever the server resolved.
        if named {
            self.statements.insert(param_oids, statement.clone());
        } else {
            self.unnamed = Some((param_oids.to_vec(), statement.clone()));
        }
        Ok(statement)
    }

    /// Bind `params` to `query` as `portal` and fetch the first batch.
    ///
    /// A statement the server no longer accepts (dropped, or its result type
    /// changed) is prepared again once, unless the transaction has failed.
    pub(crate) async fn execute(
        &mut self,
        query: &str,
        params: &[Encoded],
        portal: &str,
    ) -> Result<ExecuteOutcome> {
        self.check_usable()?;
        if params.len() > MAX_PARAMETERS {
            return Err(Error::InvalidUsage(format!(
                "{} parameters given, at most {MAX_PARAMETERS} are supported",
                params.len()
            )));
        }
        let param_oids: Vec<Oid> = params.iter().map(|p| p.oid).collect();
        let max_rows = self.max_rows();
        let mut retried = false;
        loop {
            let statement = self.statement(query, &param_oids).await?;
            let close = self.statements.take_pending_close();
            let mut state_machine =
                ExecuteStateMachine::bind(portal, &statement, params, max_rows, &close);
            match self.run(&mut state_machine, CopyStream::None).await {
                Ok(()) => {
                    let outcome = state_machine.into_outcome();
                    if outcome.statements_dropped {
                        self.forget_statements();
                    } else if outcome.described
                        && column_oids(outcome.columns.as_deref()) != statement.column_oids()
                    {
                        self.statements
                            .update_columns(query, &param_oids, outcome.columns.clone());
                    }
                    return Ok(outcome);
                }
                Err(err)
                    if !retried
                        && matches!(err.sqlstate(), Some("0A000") | Some("26000"))
                        && !self.transaction_status.is_failed() =>
                {
                    debug!(error = %err, "preparing statement again");
                    self.statements.invalidate(query, &param_oids);
                    self.unnamed = None;
                    retried = true;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Fetch the next batch of a suspended portal.
    pub(crate) async fn resume(
        &mut self,
        portal: &str,
        columns: Vec<ColumnDescription>,
    ) -> Result<ExecuteOutcome> {
        self.check_usable()?;
        let mut state_machine = ExecuteStateMachine::resume(portal, columns, self.max_rows());
        self.run(&mut state_machine, CopyStream::None).await?;
        Ok(state_machine.into_outcome())
    }

    fn max_rows(&self) -> u32 {
        u32::try_from(self.opts.row_cache_size).unwrap_or(i32::MAX as u32)
    }

    /// Drive a state machine to completion, marking the session broken on
    /// errors it cannot recover from.
    async fn run<S: StateMachine>(
        &mut self,
        state_machine: &mut S,
        copy: CopyStream<'_>,
    ) -> Result<()> {
        if self.is_broken {
            return Err(Error::ConnectionBroken);
        }
        let result = self.drive(state_machine, copy).await;
        self.transaction_status = state_machine.transaction_status();
        if let Err(e) = &result
            && e.is_connection_broken()
        {
            warn!(error = %e, "connection marked broken");
            self.is_broken = true;
        }
        result
    }

    async fn drive<S: StateMachine>(
        &mut self,
        state_machine: &mut S,
        mut copy: CopyStream<'_>,
    ) -> Result<()> {
        let mut action = state_machine.start(&mut self.buffer_set)?;
        loop {
            match action {
                Action::ReadMessage => {}
                Action::WriteAndReadMessage => {
                    self.stream.send(&self.buffer_set.write_buffer).await?;
                }
                Action::HandleAsyncMessageAndReadMessage(message) => {
                    self.handle_async_message(message);
                }
                Action::CopyIn => self.copy_in(&mut copy).await?,
                Action::CopyOutData => match &mut copy {
                    CopyStream::Out(writer) => {
                        writer.write_all(&self.buffer_set.read_buffer).await?;
                    }
                    _ => debug!("discarding COPY data without a sink"),
                },
                Action::Finished => break,
            }
            self.stream.read_message(&mut self.buffer_set).await?;
            action = state_machine.step(&mut self.buffer_set)?;
        }
        if let CopyStream::Out(writer) = &mut copy {
            writer.flush().await?;
        }
        Ok(())
    }

    /// Stream the caller's source as CopyData, then CopyDone.
    async fn copy_in(&mut self, copy: &mut CopyStream<'_>) -> Result<()> {
        let CopyStream::In(reader) = copy else {
            self.buffer_set.write_buffer.clear();
            write_copy_fail(&mut self.buffer_set.write_buffer, "no COPY source provided");
            return self.stream.send(&self.buffer_set.write_buffer).await;
        };

        let mut chunk = vec![0u8; COPY_CHUNK];
        loop {
            let buf = &mut self.buffer_set.write_buffer;
            buf.clear();
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    write_copy_done(buf);
                    break;
                }
                Ok(n) => write_copy_data(buf, &chunk[..n]),
                Err(e) => {
                    // The server answers CopyFail with an ErrorResponse.
                    write_copy_fail(buf, &format!("reading COPY source failed: {e}"));
                    break;
                }
            }
            self.stream.send(&self.buffer_set.write_buffer).await?;
        }
        self.stream.send(&self.buffer_set.write_buffer).await
    }

    fn handle_async_message(&mut self, message: AsyncMessage) {
        match message {
            AsyncMessage::Notification { pid, channel, payload } => {
                self.notifications.push_back(Notification { pid, channel, payload });
            }
            AsyncMessage::Notice(notice) => {
                info!(notice = %notice, "server notice");
                if self.notices.len() == MAX_NOTICES {
                    self.notices.pop_front();
                }
                self.notices.push_back(notice);
            }
            AsyncMessage::ParameterChanged { name, value } => {
                debug!(%name, %value, "server parameter changed");
                self.server_params.insert(name, value);
            }
        }
    }
}

fn column_oids(columns: Option<&[ColumnDescription]>) -> Vec<Oid> {
    columns.into_iter().flatten().map(|c| c.type_oid).collect()
}
