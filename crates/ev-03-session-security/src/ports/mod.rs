//! Ports for session security.

pub mod outbound;
