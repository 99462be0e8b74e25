//! # Codec Errors

use thiserror::Error;

/// Errors raised while decoding an NDR stub.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NdrError {
    /// The stub ended before a field could be read.
    #[error("Unexpected end of stub: needed {needed} bytes at offset {offset}, {remaining} remaining")]
    UnexpectedEnd {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    /// A counted value is larger than the operation allows.
    #[error("{field} out of range: {value} (max {max})")]
    OutOfRange {
        field: &'static str,
        value: u64,
        max: u64,
    },

    /// A conformant varying string had inconsistent counts or bad UTF-16.
    #[error("Invalid string: {0}")]
    InvalidString(String),

    /// Structure inconsistency (mismatched array counts and similar).
    #[error("Malformed stub: {0}")]
    Malformed(String),
}
