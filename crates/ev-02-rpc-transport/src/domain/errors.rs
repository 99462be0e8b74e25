//! # Transport Errors
//!
//! Error taxonomy for one connection: network, framing, authentication,
//! server fault and endpoint resolution.

use std::io;

use thiserror::Error;

use crate::ports::outbound::{ResolutionError, SecurityError};

/// Errors raised by a `TransportConnection`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    // ----- network -----
    /// TCP connect failed or timed out.
    #[error("Connect to {addr} failed: {reason}")]
    ConnectFailed { addr: String, reason: String },

    /// A blocking read exceeded the local read timeout.
    #[error("Read timed out")]
    Timeout,

    /// Any other socket failure.
    #[error("I/O error ({kind:?}): {message}")]
    Io { kind: io::ErrorKind, message: String },

    /// The peer closed the connection in the middle of a fragment.
    #[error("Couldn't read all expected bytes (expected {expected}, read {read})")]
    ShortRead { expected: usize, read: usize },

    // ----- framing -----
    /// Header marker bytes are not the connection-oriented version 5.0.
    #[error("Invalid PDU marker ({0:#04x}, {1:#04x})")]
    BadMarker(u8, u8),

    /// Declared fragment length is over the negotiated maximum.
    #[error("Fragment length {declared} exceeds maximum {max}")]
    FragmentTooLarge { declared: u16, max: u16 },

    /// Declared fragment length cannot hold its own header.
    #[error("Fragment length {0} is shorter than the header")]
    FragmentTooShort(u16),

    #[error("Unexpected packet type {actual} (expected {expected})")]
    UnexpectedPacket { expected: u8, actual: u8 },

    #[error("Call id mismatch: sent {sent}, received {received}")]
    CallIdMismatch { sent: u32, received: u32 },

    #[error("Malformed PDU: {0}")]
    Malformed(String),

    // ----- negotiation / server -----
    /// Bind refused (bind-nak or rejected presentation context).
    #[error("Bind rejected (reason {reason})")]
    BindRejected { reason: u16 },

    /// The server answered a request with a fault PDU.
    #[error("Server fault {status:#010x}")]
    Fault { status: u32 },

    // ----- authentication -----
    #[error("Security failure: {0}")]
    Security(#[from] SecurityError),

    // ----- resolution -----
    #[error("Endpoint resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    // ----- state -----
    #[error("Connection is not bound")]
    NotBound,

    #[error("Connection is already bound")]
    AlreadyBound,

    #[error("Connection is closed")]
    Closed,

    #[error("No port known for {0} and no endpoint resolver attached")]
    NoEndpoint(String),

    #[error("Invalid connection config: {0}")]
    InvalidConfig(String),
}

impl TransportError {
    /// Local read timeout. The only error a caller may recover from, and only
    /// on a connection whose sole job is long-polling.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }

    /// Network-class failure (connect, timeout, socket error, premature close).
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectFailed { .. }
                | TransportError::Timeout
                | TransportError::Io { .. }
                | TransportError::ShortRead { .. }
        )
    }

    /// Framing failure; the byte stream can no longer be trusted.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            TransportError::BadMarker(..)
                | TransportError::FragmentTooLarge { .. }
                | TransportError::FragmentTooShort(_)
                | TransportError::UnexpectedPacket { .. }
                | TransportError::CallIdMismatch { .. }
                | TransportError::Malformed(_)
        )
    }

    /// Whether the connection must be dropped after this error.
    pub fn aborts_connection(&self) -> bool {
        !matches!(
            self,
            TransportError::Fault { .. }
                | TransportError::NotBound
                | TransportError::AlreadyBound
                | TransportError::Closed
                | TransportError::InvalidConfig(_)
        )
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout,
            kind => TransportError::Io {
                kind,
                message: err.to_string(),
            },
        }
    }
}
