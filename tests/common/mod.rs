//! Scripted in-memory PostgreSQL server for driving a `Connection`.

#![allow(dead_code)]

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use tokio::task::JoinHandle;
use zero_pgcursor::Opts;
use zero_pgcursor::tokio::Connection;

pub struct Server {
    io: DuplexStream,
}

impl Server {
    /// Read the untagged StartupMessage and return its body.
    pub async fn read_startup(&mut self) -> Vec<u8> {
        let len = self.io.read_u32().await.unwrap() as usize;
        let mut body = vec![0; len - 4];
        self.io.read_exact(&mut body).await.unwrap();
        body
    }

    pub async fn recv(&mut self) -> (u8, Vec<u8>) {
        let type_byte = self.io.read_u8().await.unwrap();
        let len = self.io.read_u32().await.unwrap() as usize;
        let mut payload = vec![0; len - 4];
        self.io.read_exact(&mut payload).await.unwrap();
        (type_byte, payload)
    }

    /// Read messages and check their type bytes, returning the payloads.
    pub async fn expect(&mut self, types: &[u8]) -> Vec<Vec<u8>> {
        let mut payloads = Vec::new();
        for &expected in types {
            let (type_byte, payload) = self.recv().await;
            assert_eq!(
                type_byte as char, expected as char,
                "client sent an unexpected message"
            );
            payloads.push(payload);
        }
        payloads
    }

    pub async fn send(&mut self, type_byte: u8, payload: &[u8]) {
        let mut frame = vec![type_byte];
        frame.extend_from_slice(&(payload.len() as u32 + 4).to_be_bytes());
        frame.extend_from_slice(payload);
        self.io.write_all(&frame).await.unwrap();
    }

    pub async fn ready(&mut self, status: u8) {
        self.send(b'Z', &[status]).await;
    }

    /// Trust authentication through to the first ReadyForQuery.
    pub async fn accept(&mut self) {
        self.read_startup().await;
        self.finish_startup().await;
    }

    pub async fn finish_startup(&mut self) {
        self.send(b'R', &0_i32.to_be_bytes()).await;
        self.send(b'S', b"server_version\x0016.2\0").await;
        let mut key = 42_u32.to_be_bytes().to_vec();
        key.extend_from_slice(&7_u32.to_be_bytes());
        self.send(b'K', &key).await;
        self.ready(b'I').await;
    }

    /// Answer Parse + Describe(statement) + Sync for a statement without
    /// parameters returning `columns`.
    pub async fn answer_prepare(&mut self, columns: &[(&str, u32)], status: u8) -> String {
        let payloads = self.expect(b"PDS").await;
        self.send(b'1', b"").await;
        self.send(b't', &0_u16.to_be_bytes()).await;
        if columns.is_empty() {
            self.send(b'n', b"").await;
        } else {
            self.send(b'T', &row_description(columns)).await;
        }
        self.ready(status).await;
        cstr(&payloads[0])
    }

    /// Answer the head of Close(portal) + Bind + Describe(portal) + Execute +
    /// Sync. The caller sends the rows, the end of the batch and ReadyForQuery.
    /// Returns the payloads of the five client messages.
    pub async fn answer_bind(&mut self, columns: &[(&str, u32)]) -> Vec<Vec<u8>> {
        let payloads = self.expect(b"CBDES").await;
        self.send(b'3', b"").await;
        self.send(b'2', b"").await;
        if columns.is_empty() {
            self.send(b'n', b"").await;
        } else {
            self.send(b'T', &row_description(columns)).await;
        }
        payloads
    }

    /// Answer a Query message with one command tag.
    pub async fn answer_query(&mut self, tag: &str, status: u8) -> String {
        let payloads = self.expect(b"Q").await;
        self.send(b'C', &cstring(tag)).await;
        self.ready(status).await;
        cstr(&payloads[0])
    }

    pub async fn error(&mut self, code: &str, message: &str) {
        let payload = format!("SERROR\0VERROR\0C{code}\0M{message}\0\0");
        self.send(b'E', payload.as_bytes()).await;
    }

    pub fn into_inner(self) -> DuplexStream {
        self.io
    }
}

pub fn cstring(s: &str) -> Vec<u8> {
    let mut out = s.as_bytes().to_vec();
    out.push(0);
    out
}

/// First null-terminated string of a payload.
pub fn cstr(payload: &[u8]) -> String {
    let end = payload.iter().position(|&b| b == 0).unwrap();
    String::from_utf8(payload[..end].to_vec()).unwrap()
}

/// RowDescription with text-format columns.
pub fn row_description(columns: &[(&str, u32)]) -> Vec<u8> {
    let mut payload = (columns.len() as u16).to_be_bytes().to_vec();
    for (name, oid) in columns {
        payload.extend_from_slice(&cstring(name));
        payload.extend_from_slice(&0_u32.to_be_bytes());
        payload.extend_from_slice(&0_i16.to_be_bytes());
        payload.extend_from_slice(&oid.to_be_bytes());
        payload.extend_from_slice(&(-1_i16).to_be_bytes());
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&0_u16.to_be_bytes());
    }
    payload
}

/// DataRow of text values.
pub fn data_row(values: &[Option<&str>]) -> Vec<u8> {
    let mut payload = (values.len() as u16).to_be_bytes().to_vec();
    for value in values {
        match value {
            Some(text) => {
                payload.extend_from_slice(&(text.len() as i32).to_be_bytes());
                payload.extend_from_slice(text.as_bytes());
            }
            None => payload.extend_from_slice(&(-1_i32).to_be_bytes()),
        }
    }
    payload
}

/// Connect to a scripted server. The script runs on its own task and gets
/// the server end after startup has been answered with trust auth.
pub async fn connect<F, Fut>(opts: Opts, script: F) -> (Connection, JoinHandle<()>)
where
    F: FnOnce(Server) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let (client, server) = duplex(64 * 1024);
    let handle = tokio::spawn(async move {
        let mut server = Server { io: server };
        server.accept().await;
        script(server).await;
    });
    let conn = Connection::connect(client, opts).await.unwrap();
    (conn, handle)
}

/// A raw server end, for scripts that handle startup themselves.
pub fn pair() -> (DuplexStream, Server) {
    let (client, server) = duplex(64 * 1024);
    (client, Server { io: server })
}

pub fn opts(autocommit: bool) -> Opts {
    Opts {
        user: "tester".into(),
        database: Some("test".into()),
        password: Some("secret".into()),
        autocommit,
        paramstyle: Some(zero_pgcursor::ParamStyle::Format),
        ..Opts::default()
    }
}
