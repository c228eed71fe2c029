//! Error types for pgsql.

use thiserror::Error;

use crate::conn::ConnStatus;

/// Result type for pgsql operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error fields from a PostgreSQL ErrorResponse or NoticeResponse.
///
/// The server emits every field as a string, including numeric ones like
/// `position` and `line`, so they are preserved verbatim here.
#[derive(Debug, Clone, Default)]
pub struct ServerError {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in the query string (1-based)
    pub position: Option<String>,
    /// Position in an internally-generated query
    pub internal_position: Option<String>,
    /// Failed internal command text
    pub internal_query: Option<String>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Source file name
    pub file: Option<String>,
    /// Source line number
    pub line: Option<String>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ServerError {
    /// Get the SQLSTATE code, if the server sent one.
    pub fn sqlstate(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Returns true if the severity indicates the session is gone.
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity.as_deref(), Some("FATAL") | Some("PANIC"))
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
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

/// Error type for pgsql.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response, with every field preserved.
    #[error("PostgreSQL error: {0}")]
    Server(ServerError),

    /// Protocol error (malformed message, unexpected response, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error on the underlying stream. Fatal to the connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server requested an authentication method this library does not speak.
    #[error("Authentication method not supported: type {0}")]
    AuthNotSupported(i32),

    /// The requested operation is not legal in the connection's current state.
    #[error("invalid operation {op} for state {state}")]
    InvalidOpForState {
        /// The operation that was attempted
        op: &'static str,
        /// The state the connection was in
        state: ConnStatus,
    },

    /// Scan was called with a target count different from the field count.
    #[error("wrong argument count: {expected} fields, {actual} arguments")]
    WrongArgumentCount {
        /// Number of fields in the current result
        expected: usize,
        /// Number of scan targets supplied
        actual: usize,
    },

    /// A value was assigned to a parameter whose declared type cannot hold it.
    #[error("value of kind {value} is not compatible with parameter type {param}")]
    TypeMismatch {
        /// Declared parameter type name
        param: &'static str,
        /// Kind of the rejected value
        value: &'static str,
    },

    /// Failed to decode a field value.
    #[error("decode error: {0}")]
    Decode(String),

    /// Binary-format decoding is deliberately unimplemented for this type.
    #[error("binary decoding not implemented for {0}")]
    DecodingNotImplemented(&'static str),

    /// API misuse: bad connection string, duplicate parameter names, double close, ...
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    /// Connection pool error.
    #[error("pool error: {0}")]
    Pool(String),
}

impl Error {
    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.sqlstate(),
            _ => None,
        }
    }

    /// Returns true if the error means the connection cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::Protocol(_) | Error::AuthNotSupported(_) => true,
            Error::Server(fields) => fields.is_fatal(),
            _ => false,
        }
    }
}
