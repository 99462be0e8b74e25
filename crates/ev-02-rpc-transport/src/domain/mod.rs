//! Domain layer for the RPC transport.

pub mod binding;
pub mod config;
pub mod errors;
pub mod framing;
pub mod pdu;
