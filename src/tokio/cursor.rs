//! DB-API style cursor.

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::Row;
use crate::error::{Error, Result};
use crate::paramstyle::{Params, translate};
use crate::protocol::types::TransactionStatus;
use crate::state::ExecuteOutcome;
use crate::statement::ColumnDescription;
use crate::types::{Encoded, Value};

use super::conn::{Connection, CopyStream};

/// Runs statements and buffers their rows.
///
/// Rows arrive in batches of the connection's `row_cache_size`. With
/// autocommit on, a result must fit in one batch: the portal does not
/// outlive the implicit transaction, so a larger result fails with
/// [`Error::RowCacheExceeded`] instead of being cut short.
pub struct Cursor {
    conn: Connection,
    portal: String,
    arraysize: usize,
    description: Option<Vec<ColumnDescription>>,
    rows: VecDeque<Row>,
    rowcount: i64,
    /// The portal has rows left on the server
    suspended: bool,
    /// Rows received for the current result, across batches
    fetched: u64,
    batches: u32,
    closed: bool,
}

impl Cursor {
    pub(crate) fn new(conn: Connection, portal: String) -> Self {
        Self {
            conn,
            portal,
            arraysize: 1,
            description: None,
            rows: VecDeque::new(),
            rowcount: -1,
            suspended: false,
            fetched: 0,
            batches: 0,
            closed: false,
        }
    }

    /// The connection this cursor runs on.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Columns of the current result; `None` if the last statement
    /// returned no rows.
    pub fn description(&self) -> Option<&[ColumnDescription]> {
        self.description.as_deref()
    }

    /// Rows affected by the last statement, or -1 if unknown.
    pub fn rowcount(&self) -> i64 {
        self.rowcount
    }

    /// Default batch size of [`fetchmany`](Self::fetchmany).
    pub fn arraysize(&self) -> usize {
        self.arraysize
    }

    pub fn set_arraysize(&mut self, arraysize: usize) {
        self.arraysize = arraysize;
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::InvalidUsage("cursor is closed".into()))
        } else {
            Ok(())
        }
    }

    fn reset(&mut self) {
        self.description = None;
        self.rows.clear();
        self.rowcount = -1;
        self.suspended = false;
        self.fetched = 0;
        self.batches = 0;
    }

    /// Run `query` with `params` in the configured placeholder style.
    ///
    /// With no parameters the query is sent as written, so literal `%` and
    /// `?` need no escaping.
    pub async fn execute(&mut self, query: &str, params: impl Into<Params>) -> Result<()> {
        self.check_open()?;
        self.reset();
        let params = params.into();

        let mut inner = self.conn.inner.lock().await;
        inner.check_usable()?;
        let (query, values) = if params.is_none() {
            (query.to_string(), Vec::new())
        } else {
            translate(query, inner.paramstyle(), &params)?
        };
        let encoded = values.iter().map(Value::encode).collect::<Result<Vec<Encoded>>>()?;

        inner.begin_if_needed().await?;
        let outcome = inner.execute(&query, &encoded, &self.portal).await?;
        if outcome.suspended && inner.transaction_status() == TransactionStatus::Idle {
            return Err(Error::RowCacheExceeded(inner.row_cache_size()));
        }
        drop(inner);

        self.description = outcome.columns.clone();
        self.absorb(outcome);
        Ok(())
    }

    /// Run `query` once per parameter set. `rowcount` becomes the total
    /// count, or -1 if any statement did not report one.
    pub async fn executemany<I, P>(&mut self, query: &str, param_seq: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<Params>,
    {
        let mut total = Some(0_i64);
        for params in param_seq {
            self.execute(query, params).await?;
            total = total.and_then(|sum| (self.rowcount >= 0).then_some(sum + self.rowcount));
        }
        self.rowcount = total.unwrap_or(-1);
        Ok(())
    }

    fn absorb(&mut self, outcome: ExecuteOutcome) {
        self.batches += 1;
        self.fetched += outcome.rows.len() as u64;
        self.rows.extend(outcome.rows);
        self.suspended = outcome.suspended;
        if !self.suspended {
            // A resumed portal only reports the count of its last batch.
            self.rowcount = match outcome.rows_affected {
                Some(_) if self.batches > 1 => self.fetched as i64,
                Some(count) => count as i64,
                None => -1,
            };
        }
    }

    async fn fetch_more(&mut self) -> Result<()> {
        let columns = self.description.clone().unwrap_or_default();
        let outcome = {
            let mut inner = self.conn.inner.lock().await;
            inner.resume(&self.portal, columns).await?
        };
        self.absorb(outcome);
        Ok(())
    }

    /// Next row, or `None` when the result is exhausted.
    pub async fn fetchone(&mut self) -> Result<Option<Row>> {
        self.check_open()?;
        if self.description.is_none() {
            return Err(Error::InvalidUsage("no result set".into()));
        }
        while self.rows.is_empty() && self.suspended {
            self.fetch_more().await?;
        }
        Ok(self.rows.pop_front())
    }

    /// Up to `size` rows, [`arraysize`](Self::arraysize) if `None`.
    pub async fn fetchmany(&mut self, size: Option<usize>) -> Result<Vec<Row>> {
        let size = size.unwrap_or(self.arraysize);
        let mut rows = Vec::with_capacity(size.min(self.rows.len()));
        while rows.len() < size {
            match self.fetchone().await? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    /// All remaining rows.
    pub async fn fetchall(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetchone().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Run `COPY ... FROM STDIN`, streaming `reader` to the server.
    pub async fn copy_in<R>(&mut self, query: &str, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.copy(query, CopyStream::In(reader)).await
    }

    /// Run `COPY ... TO STDOUT`, writing the data to `writer`.
    pub async fn copy_out<W>(&mut self, query: &str, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.copy(query, CopyStream::Out(writer)).await
    }

    async fn copy(&mut self, query: &str, stream: CopyStream<'_>) -> Result<()> {
        self.check_open()?;
        self.reset();
        let mut inner = self.conn.inner.lock().await;
        inner.begin_if_needed().await?;
        let count = inner.simple_query(query, stream).await?;
        self.rowcount = count.map_or(-1, |n| n as i64);
        Ok(())
    }

    /// Release the buffered rows. Later calls fail with a usage error.
    pub fn close(&mut self) {
        self.reset();
        self.closed = true;
    }
}
