//! Transport abstraction and message framing over it.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::SslMode;
use crate::protocol::frontend::write_ssl_request;

/// A bidirectional byte channel to the server.
///
/// Implemented for anything that is `AsyncRead + AsyncWrite + Unpin + Send`:
/// a `TcpStream`, a TLS stream over one, or an in-memory duplex.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Buffered transport owned by a connection.
pub(crate) struct Stream {
    inner: BufReader<Box<dyn Transport>>,
}

impl Stream {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            inner: BufReader::new(transport),
        }
    }

    /// Read one framed message into `buffer_set`.
    pub async fn read_message(&mut self, buffer_set: &mut BufferSet) -> Result<()> {
        buffer_set.type_byte = self.inner.read_u8().await?;
        let length = self.inner.read_u32().await?;
        if length < 4 {
            return Err(Error::Protocol(format!("Invalid message length: {}", length)));
        }

        let payload_len = (length - 4) as usize;
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.resize(payload_len, 0);
        self.inner.read_exact(&mut buffer_set.read_buffer).await?;
        Ok(())
    }

    /// Write and flush `buf`.
    pub async fn send(&mut self, buf: &[u8]) -> Result<()> {
        let writer = self.inner.get_mut();
        writer.write_all(buf).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Send SSLRequest and read the server's one-byte answer.
///
/// Returns `true` if the server is willing to switch to SSL. The caller then
/// runs the TLS handshake on the same channel and connects over the result.
pub async fn request_ssl<T: AsyncRead + AsyncWrite + Unpin>(transport: &mut T) -> Result<bool> {
    let mut buf = Vec::with_capacity(8);
    write_ssl_request(&mut buf);
    transport.write_all(&buf).await?;
    transport.flush().await?;
    match transport.read_u8().await? {
        b'S' => Ok(true),
        b'N' => Ok(false),
        other => Err(Error::Protocol(format!(
            "unexpected SSLRequest response: '{}'",
            other as char
        ))),
    }
}

/// Apply `mode` to a fresh channel: skip SSLRequest for `Disable`, and fail
/// for `Require` when the server declines.
pub async fn negotiate_ssl<T: AsyncRead + AsyncWrite + Unpin>(
    transport: &mut T,
    mode: SslMode,
) -> Result<bool> {
    match mode {
        SslMode::Disable => Ok(false),
        SslMode::Prefer => request_ssl(transport).await,
        SslMode::Require => {
            if request_ssl(transport).await? {
                Ok(true)
            } else {
                Err(Error::Unsupported("server does not support SSL".into()))
            }
        }
    }
}
