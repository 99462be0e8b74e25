//! # Event Log Errors
//!
//! Everything a subscription can fail with. Transport failures are wrapped
//! unchanged so callers can still ask whether the root cause was network I/O.

use ev_02_rpc_transport::TransportError;
use shared_types::NdrError;
use thiserror::Error;

use crate::domain::messages::Operation;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventLogError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server answered with a non-zero return value.
    #[error("{operation} returned status {status:#010x}")]
    ServerStatus { operation: Operation, status: u32 },

    /// Response stub did not decode.
    #[error("Malformed {operation} response: {reason}")]
    Decode {
        operation: Operation,
        reason: NdrError,
    },

    /// An (offset, length) pair or a record header points outside its buffer.
    #[error("Malformed event record: {0}")]
    MalformedRecord(String),

    /// Rejected before any network call.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The external event decoder failed.
    #[error("Event decode failed: {0}")]
    EventDecode(String),

    /// The operation needs a pull connection that is not open.
    #[error("Pull connection is not open")]
    NotConnected,

    #[error("Subscription session is closed")]
    Closed,
}

impl EventLogError {
    pub fn decode(operation: Operation, reason: NdrError) -> Self {
        EventLogError::Decode { operation, reason }
    }

    /// Whether the root cause is network I/O (connect, timeout, reset, short read).
    pub fn is_io(&self) -> bool {
        matches!(self, EventLogError::Transport(e) if e.is_io())
    }

    /// Local read timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, EventLogError::Transport(e) if e.is_timeout())
    }
}
