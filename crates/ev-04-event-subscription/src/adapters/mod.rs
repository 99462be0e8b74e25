//! Adapters: TCP connections to the event log service.

pub mod tcp;

pub use tcp::{lookup_event_log_port, TcpChannel, TcpChannelFactory};
