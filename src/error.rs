//! Error types
//!
//! Two layers of failure live in this crate: fatal, process-level errors
//! ([`Error`]: configuration, socket binds, broken upstreams) and protocol
//! errors raised while parsing RTSP messages ([`ProtocolError`]). Refusals
//! issued by the coordinator are a third, non-fatal kind and live in
//! [`crate::coordinator::ControlError`] because sessions translate them
//! straight into RTSP status lines.

use std::io;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration file or values. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O failure (bind, read, write).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Malformed RTSP or SDP data on the wire.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A configured source URL could not be used.
    #[error("invalid source url '{url}': {reason}")]
    SourceUrl { url: String, reason: String },

    /// The coordinator shut down while the operation was in flight.
    #[error("terminated")]
    Terminated,
}

/// Errors raised while parsing or framing RTSP messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty message")]
    EmptyMessage,

    #[error("invalid request line: '{0}'")]
    InvalidRequestLine(String),

    #[error("invalid status line: '{0}'")]
    InvalidStatusLine(String),

    #[error("invalid header line: '{0}'")]
    InvalidHeader(String),

    /// Header section or body exceeded the fixed size cap.
    #[error("message too large")]
    MessageTooLarge,

    #[error("invalid Transport header: '{0}'")]
    InvalidTransport(String),

    #[error("invalid session description: {0}")]
    InvalidSdp(String),

    #[error("unexpected response status {0}")]
    UnexpectedStatus(u16),
}
