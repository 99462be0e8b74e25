//! # Outbound Ports (Driven Ports / SPI)
//!
//! What a `TransportConnection` needs from the outside: a way to find the
//! dynamic port for an interface, and a way to authenticate and protect
//! messages.

use std::ops::Range;

use shared_types::SyntaxId;
use thiserror::Error;

use crate::domain::binding::AuthLevel;

// =============================================================================
// ENDPOINT RESOLUTION
// =============================================================================

/// Error from endpoint resolution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    /// The mapping service could not be reached or the exchange failed.
    #[error("Endpoint mapper at {host} unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    /// Response stub was short or inconsistent.
    #[error("Malformed endpoint mapper response: {0}")]
    MalformedResponse(String),

    /// Returned tower does not have the expected floor layout.
    #[error("Tower layout mismatch: {0}")]
    TowerMismatch(String),

    /// The mapper answered with a non-zero status.
    #[error("Endpoint mapper returned status {0:#010x}")]
    MapperStatus(u32),

    /// The mapper answered but returned no towers.
    #[error("No endpoint registered for the interface")]
    NotRegistered,
}

/// Resolves the dynamic TCP port serving an interface.
///
/// Consulted once, at first bind, when a `Binding` has no port.
pub trait EndpointResolver: Send + Sync {
    fn resolve(&self, host: &str, interface: &SyntaxId) -> Result<u16, ResolutionError>;
}

// =============================================================================
// MESSAGE SECURITY
// =============================================================================

/// Error from the security provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecurityError {
    /// A handshake PDU arrived without the expected token.
    #[error("Missing authentication token in {0}")]
    MissingToken(&'static str),

    /// The token could not be parsed.
    #[error("Malformed authentication token: {0}")]
    MalformedToken(String),

    /// Protect/verify was called before the handshake finished.
    #[error("Security context not established")]
    NotEstablished,

    /// The received signature does not match the computed one.
    #[error("Signature mismatch for received message")]
    SignatureMismatch,

    /// The PDU is too short to hold a body, trailer and signature.
    #[error("Message too short for protection: {0} bytes")]
    MessageTooShort(usize),

    /// Credential lookup or cryptographic setup failed.
    #[error("Security provider failure: {0}")]
    Provider(String),
}

/// Authenticates a connection and protects its request/response PDUs.
///
/// One provider belongs to exactly one connection. The transport owns the
/// security trailer layout; the provider owns tokens and cryptography.
pub trait SecurityProvider: Send {
    /// Authentication service tag written into every trailer.
    fn auth_type(&self) -> u8;

    fn auth_level(&self) -> AuthLevel;

    /// Size of the verifier appended to request/response PDUs.
    fn signature_len(&self) -> usize {
        16
    }

    /// Initial token carried on the bind PDU.
    fn negotiate_token(&mut self) -> Result<Vec<u8>, SecurityError>;

    /// Consumes the bind-ack challenge and returns the confirmation token.
    ///
    /// On success the provider is established and ready to protect messages.
    fn process_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SecurityError>;

    fn is_established(&self) -> bool;

    /// Protects an outbound PDU in place.
    ///
    /// `pdu` is the whole fragment with a zeroed verifier slot at the end.
    /// `body` is the range that sealing encrypts.
    fn protect(&mut self, pdu: &mut [u8], body: Range<usize>) -> Result<(), SecurityError>;

    /// Verifies (and unseals) an inbound PDU in place.
    fn verify(&mut self, pdu: &mut [u8], body: Range<usize>) -> Result<(), SecurityError>;
}
