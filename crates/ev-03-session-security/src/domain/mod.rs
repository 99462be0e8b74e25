//! Domain layer for session security.

pub mod crypto;
pub mod errors;
pub mod messages;
pub mod ntlmv2;
pub mod session;
