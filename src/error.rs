//! Error model shared by the decoder, the normalizer, the sinks and the server lifecycle.
//! Decode errors are fatal to one session, normalization and sink errors are only logged, and
//! lifecycle errors are returned to whoever called `start`/`stop`.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Failures while decoding frontend frames. Every variant terminates the session that hit it.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid frame length {len} for {kind} frame")]
    InvalidLength { kind: &'static str, len: i32 },

    #[error("{kind} frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { kind: &'static str, len: usize, max: usize },

    #[error("{kind} message truncated while reading {field}")]
    Truncated { kind: &'static str, field: &'static str },

    #[error("{kind} message declares {declared} payload bytes but {consumed} were decoded")]
    LengthMismatch { kind: &'static str, declared: usize, consumed: usize },

    #[error("invalid UTF-8 in {field} of {kind} message")]
    InvalidUtf8 { kind: &'static str, field: &'static str },

    #[error("invalid {field} in {kind} message: {value}")]
    InvalidField { kind: &'static str, field: &'static str, value: i64 },

    #[error("unsupported protocol version {major}.{minor}")]
    UnsupportedProtocolVersion { major: u16, minor: u16 },

    #[error("connection closed inside a frame ({0} bytes buffered)")]
    UnexpectedEof(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures from [`crate::normalize::QueryNormalizer::normalize`]. Never fatal to a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("empty query cannot be normalized")]
    EmptyQuery,

    #[error("syntax error: {0}")]
    SyntaxError(String),
}

/// Failures reported by a [`crate::sink::Sink`]; logged by the session and otherwise ignored.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink is full, event dropped")]
    Backpressure,

    #[error("sink is closed")]
    Closed,

    #[error("sink failure: {0}")]
    Other(String),
}

/// Lifecycle errors returned by [`crate::pgwire_server::Server`].
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already running on {0}")]
    AlreadyRunning(String),

    #[error("failed to listen on {address}: {source}")]
    BindFailure {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{remaining} session(s) still open after waiting {timeout:?} for drain")]
    DrainTimeout { timeout: Duration, remaining: usize },

    #[error("start of {address} was cancelled by a concurrent stop")]
    StartCancelled { address: String },
}

impl ServerError {
    pub(crate) fn already_running(addr: Option<SocketAddr>) -> Self {
        ServerError::AlreadyRunning(addr.map(|a| a.to_string()).unwrap_or_else(|| "<starting>".to_string()))
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
