//! Service layer for the RPC transport.

mod connection;

pub use connection::{AbortHandle, BindState, TransportConnection};

#[cfg(test)]
mod tests;
