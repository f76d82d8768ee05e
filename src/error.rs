//! Error types for the tail client and the log store.

use thiserror::Error;

/// Main error type for tail operations.
///
/// Recoverable conditions (a failed connect, a lost cursor) are absorbed by
/// the tail loop and only reach the caller through this type when a bounded
/// reconnect budget runs out. Connections lost again and again without
/// progress count against the same budget and surface as [`TailError::Read`].
#[derive(Debug, Error)]
pub enum TailError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connect failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("Read failed: {0}")]
    Read(#[from] ReadError),

    #[error("Stream exhausted: {0}")]
    Exhausted(String),

    #[error("Contract violation: {reason} in entry {entry}")]
    ContractViolation { reason: String, entry: String },

    #[error("Event sink failed: {0}")]
    Sink(String),

    #[error("Tail thread panicked")]
    Panicked,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    #[error("Log is sealed")]
    Sealed,

    #[error("Log is locked by another writer")]
    Locked,

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl TailError {
    /// Whether the tail loop may retry by reconnecting. Only connect and
    /// read failures qualify; every other kind ends the run.
    pub fn is_recoverable(&self) -> bool {
        match self {
            TailError::Connect(_) => true,
            TailError::Read(err) => !err.is_end_of_stream(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for TailError {
    fn from(e: serde_json::Error) -> Self {
        TailError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for TailError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        TailError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for TailError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        TailError::Deserialization(e.to_string())
    }
}

/// Failure to establish a session against an endpoint.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("No reachable member: {0}")]
    Unreachable(String),

    #[error("Authentication failed for user {user:?}")]
    AuthenticationFailed { user: String },

    #[error("No primary available among {members} member(s)")]
    NoPrimary { members: usize },

    #[error("No primary or secondary available among {members} member(s)")]
    NoEligibleMember { members: usize },

    #[error("Invalid member descriptor at {path}: {reason}")]
    InvalidMember { path: String, reason: String },
}

/// Failure reported by an open cursor.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("Disconnected: {0}")]
    Disconnected(String),

    #[error("Member is no longer primary: {0}")]
    NotPrimary(String),

    #[error("Cursor invalidated: {0}")]
    CursorInvalidated(String),

    #[error("Protocol failure: {0}")]
    Protocol(String),

    #[error("Stream closed: {0}")]
    StreamClosed(String),
}

impl ReadError {
    /// A deliberate end-of-stream signal from the source, as opposed to a
    /// transport or topology failure.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, ReadError::StreamClosed(_))
    }
}

impl From<TailError> for ReadError {
    fn from(e: TailError) -> Self {
        match e {
            TailError::Io(io) => ReadError::Disconnected(io.to_string()),
            TailError::Read(err) => err,
            other => ReadError::Protocol(other.to_string()),
        }
    }
}

/// Result type for tail operations.
pub type Result<T> = std::result::Result<T, TailError>;
