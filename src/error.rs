/// Unified error handling for the mongowire driver
///
/// Errors are layered the same way the wire stack is: establishment failures
/// ([`ConnectError`]) form a small closed status set, framing failures are
/// [`ProtocolError`], and everything an operation can hit funnels into
/// [`WireError`]. Server-side failures (a reply's failure flags, a command's
/// `ok` field) are never raised here; they come back as data.

use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for driver operations
#[derive(Debug, Error)]
pub enum WireError {
    /// Socket read/write failures
    #[error("Network error: {0}")]
    Network(#[from] io::Error),

    /// Connection establishment failures
    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),

    /// Framing errors in a received or encoded message
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Invalid caller-supplied argument
    #[error("Invalid argument: {message}")]
    Argument { message: String },

    /// A document could not be encoded or decoded
    #[error("Document error: {message}")]
    Document { message: String },

    /// Operation attempted on a connection without a live socket
    #[error("Not connected")]
    NotConnected,
}

/// Establishment failures, one per connect status
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("could not create socket: {0}")]
    NoSocket(#[source] io::Error),

    #[error("could not connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("replica set name mismatch: expected '{expected}', found {found:?}")]
    BadSetName {
        expected: String,
        found: Option<String>,
    },

    #[error("cannot find a primary among the replica set members")]
    CannotFindPrimary,
}

/// Framing errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("message truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("declared message length {declared} does not match {available} available bytes")]
    LengthMismatch { declared: usize, available: usize },

    #[error("message length {0} is outside the allowed range")]
    InvalidLength(i32),

    #[error("reply answers request {got}, expected {expected}")]
    ResponseMismatch { expected: i32, got: i32 },

    #[error("unexpected op code {0}")]
    UnexpectedOpCode(i32),

    #[error("document at offset {offset} declares length {length} past the message boundary")]
    DocumentOverrun { offset: usize, length: i32 },

    #[error("reply declares {declared} documents but has room for at most {capacity}")]
    DocumentCount { declared: i32, capacity: usize },

    #[error("{remaining} bytes left over after the {declared} declared documents")]
    TrailingBytes { declared: i32, remaining: usize },

    #[error("unterminated string in message body")]
    UnterminatedString,

    #[error("reply carried no document")]
    MissingDocument,
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for driver operations
pub type WireResult<T> = Result<T, WireError>;

/// Closed set of connect outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    Success,
    BadArgument,
    NoSocket,
    ConnectFailed,
    BadSetName,
    CannotFindPrimary,
}

impl ConnectStatus {
    pub fn of(result: &Result<(), ConnectError>) -> Self {
        match result {
            Ok(()) => ConnectStatus::Success,
            Err(e) => e.status(),
        }
    }
}

impl fmt::Display for ConnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectStatus::Success => "success",
            ConnectStatus::BadArgument => "bad-argument",
            ConnectStatus::NoSocket => "no-socket",
            ConnectStatus::ConnectFailed => "connect-failure",
            ConnectStatus::BadSetName => "bad-set-name",
            ConnectStatus::CannotFindPrimary => "cannot-find-primary",
        };
        f.write_str(name)
    }
}

impl ConnectError {
    pub fn status(&self) -> ConnectStatus {
        match self {
            ConnectError::BadArgument(_) => ConnectStatus::BadArgument,
            ConnectError::NoSocket(_) => ConnectStatus::NoSocket,
            ConnectError::ConnectFailed { .. } => ConnectStatus::ConnectFailed,
            ConnectError::BadSetName { .. } => ConnectStatus::BadSetName,
            ConnectError::CannotFindPrimary => ConnectStatus::CannotFindPrimary,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectError::BadArgument(_) => ErrorKind::Argument,
            ConnectError::NoSocket(_) => ErrorKind::Resource,
            ConnectError::ConnectFailed { .. } | ConnectError::CannotFindPrimary => ErrorKind::Io,
            ConnectError::BadSetName { .. } => ErrorKind::Protocol,
        }
    }

    pub fn bad_argument<S: Into<String>>(message: S) -> Self {
        ConnectError::BadArgument(message.into())
    }
}

/// Category recorded in a connection's error slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed host/port, missing seeds, bad namespace
    Argument,
    /// Socket creation failure
    Resource,
    /// Connect refused, read/write failure, short frame
    Io,
    /// Correlation mismatch, bad lengths, unexpected op code
    Protocol,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Argument => write!(f, "argument"),
            ErrorKind::Resource => write!(f, "resource"),
            ErrorKind::Io => write!(f, "io"),
            ErrorKind::Protocol => write!(f, "protocol"),
        }
    }
}

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Errors that make the driver unusable until reconfigured
    Critical,
    /// Errors that fail an operation
    Error,
    /// Transient problems a reconnect may fix
    Warning,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
        }
    }
}

impl WireError {
    /// Create an argument error
    pub fn argument<S: Into<String>>(message: S) -> Self {
        WireError::Argument {
            message: message.into(),
        }
    }

    /// Create a document error
    pub fn document<S: Into<String>>(message: S) -> Self {
        WireError::Document {
            message: message.into(),
        }
    }

    /// Slot category for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            WireError::Network(_) | WireError::NotConnected => ErrorKind::Io,
            WireError::Connect(e) => e.kind(),
            WireError::Protocol(_) | WireError::Document { .. } => ErrorKind::Protocol,
            WireError::Argument { .. } | WireError::Config(_) => ErrorKind::Argument,
        }
    }

    /// Check if a `reconnect()` followed by a retry may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            WireError::Network(_) | WireError::NotConnected => true,
            WireError::Connect(ConnectError::ConnectFailed { .. }) => true,
            WireError::Connect(ConnectError::CannotFindPrimary) => true,
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            WireError::Config(_) => ErrorSeverity::Critical,
            WireError::Connect(ConnectError::NoSocket(_)) => ErrorSeverity::Critical,
            _ if self.is_recoverable() => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

impl From<bson::raw::Error> for WireError {
    fn from(e: bson::raw::Error) -> Self {
        WireError::document(e.to_string())
    }
}
