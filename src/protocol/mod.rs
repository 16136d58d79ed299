//! PostgreSQL wire protocol v3.
//!
//! - `backend`: server → client messages (parsing)
//! - `frontend`: client → server messages (encoding)
//! - `codec`: framing primitives
//! - `types`: oids, format codes, transaction status

pub mod backend;
pub mod codec;
pub mod frontend;
pub mod types;

pub use types::{FormatCode, Oid, TransactionStatus};
