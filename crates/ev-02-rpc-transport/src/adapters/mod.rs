//! Adapters for the RPC transport.

pub mod tcp;
