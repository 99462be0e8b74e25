//! Ports for the RPC transport.

pub mod outbound;
