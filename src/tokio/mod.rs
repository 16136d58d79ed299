//! Asynchronous connection and cursor over a tokio transport.

mod conn;
mod cursor;
mod stream;

pub use conn::{Connection, Notification};
pub use cursor::Cursor;
pub use stream::{Transport, negotiate_ssl, request_ssl};
