//! Error types for zero-pgcursor.
//!
//! Every failure is an [`Error`]. Callers that think in DB-API terms can ask
//! for [`Error::kind`], which classifies the error the way the standard
//! exception hierarchy would (interface, operational, data, integrity,
//! programming, generic database).

use thiserror::Error;

/// Result type for zero-pgcursor operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Fields of an ErrorResponse or NoticeResponse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerError {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity (never translated)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary message
    pub message: Option<String>,
    /// Detailed explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in the query string (1-based)
    pub position: Option<u32>,
    /// Position in an internally generated query
    pub internal_position: Option<u32>,
    /// Internally generated query text
    pub internal_query: Option<String>,
    /// Context
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Data type name
    pub data_type: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source file name
    pub file: Option<String>,
    /// Source line number
    pub line: Option<u32>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ServerError {
    /// SQLSTATE code, or an empty string if the server sent none.
    pub fn sqlstate(&self) -> &str {
        self.code.as_deref().unwrap_or("")
    }

    /// Severity, preferring the non-localized form.
    pub fn severity(&self) -> Option<&str> {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
    }

    /// Returns true for FATAL and PANIC errors, after which the server closes the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity(), Some("FATAL") | Some("PANIC"))
    }

    /// DB-API classification of this server error.
    pub fn kind(&self) -> ErrorKind {
        if self.is_fatal() {
            return ErrorKind::Operational;
        }
        match self.sqlstate().get(..2) {
            Some("08") | Some("28") => ErrorKind::Operational,
            Some("22") => ErrorKind::Data,
            Some("23") => ErrorKind::Integrity,
            Some("42") => ErrorKind::Programming,
            _ => ErrorKind::Database,
        }
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = self.severity() {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// DB-API error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Misuse of the interface, or a limit of this client was hit
    Interface,
    /// The connection failed or can no longer be trusted
    Operational,
    /// A value could not be represented or converted
    Data,
    /// A constraint was violated
    Integrity,
    /// Malformed SQL, unknown object, bad cast
    Programming,
    /// Any other server-side error
    Database,
}

/// Error type for zero-pgcursor.
#[derive(Debug, Error)]
pub enum Error {
    /// ErrorResponse from the server
    #[error("PostgreSQL error: {0}")]
    Server(ServerError),

    /// I/O error on the transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unexpected message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Authentication failed on the client side
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The server asked for an authentication method this client does not implement
    #[error("Authentication method {0} not supported")]
    AuthNotSupported(i32),

    /// The connection was broken by an earlier error and cannot be reused
    #[error("Connection is broken")]
    ConnectionBroken,

    /// Invalid usage (operation on a closed cursor, bad parameters, ...)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// A value cannot be encoded for the wire
    #[error("Encode error: {0}")]
    Encode(String),

    /// A wire value cannot be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Array has no non-null element anywhere
    #[error("array has no values")]
    ArrayContentEmpty,

    /// Array leaves are not all of one type
    #[error("array content is not homogeneous")]
    ArrayContentNotHomogeneous,

    /// Sibling sub-arrays have different lengths
    #[error("array dimensions not consistent")]
    ArrayDimensionsNotConsistent,

    /// Element type has no array type
    #[error("array content not supported: {0}")]
    ArrayContentNotSupported(String),

    /// Result too large for the row cache in autocommit mode
    #[error("query returned more rows than the row cache holds ({0}); use a transaction")]
    RowCacheExceeded(usize),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Returns true if the error indicates the connection is broken and cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_)
            | Error::Protocol(_)
            | Error::ConnectionBroken
            | Error::Auth(_)
            | Error::AuthNotSupported(_) => true,
            Error::Server(fields) => fields.is_fatal() || fields.sqlstate().starts_with("08"),
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code.as_deref(),
            _ => None,
        }
    }

    /// DB-API classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Server(fields) => fields.kind(),
            Error::Io(_) | Error::Protocol(_) | Error::ConnectionBroken => ErrorKind::Operational,
            Error::Encode(_)
            | Error::Decode(_)
            | Error::ArrayContentEmpty
            | Error::ArrayContentNotHomogeneous
            | Error::ArrayDimensionsNotConsistent
            | Error::ArrayContentNotSupported(_) => ErrorKind::Data,
            Error::Auth(_)
            | Error::AuthNotSupported(_)
            | Error::InvalidUsage(_)
            | Error::RowCacheExceeded(_)
            | Error::Unsupported(_) => ErrorKind::Interface,
        }
    }
}
