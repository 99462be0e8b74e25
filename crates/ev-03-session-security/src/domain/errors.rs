//! NTLM errors.

use ev_02_rpc_transport::SecurityError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NtlmError {
    /// Message shorter than its fixed header.
    #[error("{message} message truncated ({len} bytes)")]
    Truncated { message: &'static str, len: usize },

    /// Message does not start with `NTLMSSP\0`.
    #[error("Missing NTLMSSP signature")]
    BadSignature,

    #[error("Unexpected NTLM message type {actual} (expected {expected})")]
    UnexpectedType { expected: u32, actual: u32 },

    /// A payload field points outside the message.
    #[error("Field {field} (offset {offset}, length {len}) out of bounds")]
    FieldOutOfBounds {
        field: &'static str,
        offset: usize,
        len: usize,
    },

    /// The server did not agree to flags this client requires.
    #[error("Server did not negotiate required flags {0:#010x}")]
    MissingFlags(u32),

    #[error("Invalid credentials: {0}")]
    Credentials(String),

    /// The challenge was processed twice or never.
    #[error("Handshake out of order: {0}")]
    OutOfOrder(&'static str),
}

impl From<NtlmError> for SecurityError {
    fn from(err: NtlmError) -> Self {
        match err {
            NtlmError::Credentials(reason) => SecurityError::Provider(reason),
            NtlmError::OutOfOrder(_) => SecurityError::NotEstablished,
            other => SecurityError::MalformedToken(other.to_string()),
        }
    }
}
