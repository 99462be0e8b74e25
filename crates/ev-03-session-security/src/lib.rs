//! # Session Security (EV-03)
//!
//! NTLM authentication for an RPC connection and the per-message protection
//! that follows it.
//!
//! ## Architecture
//!
//! - **Domain Layer** (`domain/`): NTLM message codec, NTLMv2 response and
//!   key computation, and `SessionSecurity`, the per-connection signing and
//!   sealing state.
//! - **Ports Layer** (`ports/`): `CredentialProvider`, the source of the
//!   domain, user and password.
//! - **Adapters Layer** (`adapters/`): `StaticCredentials`.
//! - **Service Layer** (`service`): `NtlmSecurityProvider`, which implements
//!   the transport's `SecurityProvider` port.
//!
//! ## Handshake
//!
//! ```text
//! bind      ──► NEGOTIATE
//! bind-ack  ◄── CHALLENGE       (server challenge, target info)
//! auth3     ──► AUTHENTICATE    (NTLMv2 response, encrypted session key)
//! ```
//!
//! After the handshake four keys are derived from the exported session key:
//! signing and sealing, for each direction. Every connection gets its own
//! provider, so keys and sequence numbers never outlive a connection.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::StaticCredentials;
pub use domain::errors::NtlmError;
pub use domain::session::{Role, SessionSecurity};
pub use ports::outbound::{CredentialProvider, Credentials};
pub use service::NtlmSecurityProvider;
