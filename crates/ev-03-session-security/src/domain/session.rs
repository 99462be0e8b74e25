//! # Session Security
//!
//! Per-message signing and sealing after an NTLM handshake with extended
//! session security.
//!
//! ## Keys
//!
//! Four keys are derived from the exported session key, each as
//! `MD5(session_key || constant)` with a distinct NUL-terminated constant:
//! client-to-server signing and sealing, server-to-client signing and
//! sealing. Each sealing key seeds one RC4 stream that runs for the life of
//! the connection.
//!
//! ## Signature Block (16 bytes)
//!
//! ```text
//! 0  version = 1 (u32 LE)
//! 4  HMAC_MD5(signing key, seq (u32 LE) || message)[..8]
//! 12 seq (u32 LE)
//! ```
//!
//! `message` is everything before the signature slot. With key exchange the
//! 8 checksum bytes also pass through the direction's RC4 stream, after the
//! body when sealing.

use std::ops::Range;

use ev_02_rpc_transport::SecurityError;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::domain::crypto::{hmac_md5, md5, Rc4Stream};

pub const SIGNATURE_LEN: usize = 16;

const SIGNATURE_VERSION: u32 = 1;

const CLIENT_SIGNING: &[u8] = b"session key to client-to-server signing key magic constant\0";
const SERVER_SIGNING: &[u8] = b"session key to server-to-client signing key magic constant\0";
const CLIENT_SEALING: &[u8] = b"session key to client-to-server sealing key magic constant\0";
const SERVER_SEALING: &[u8] = b"session key to server-to-client sealing key magic constant\0";

/// Which end of the connection this context protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Keys and state for one direction.
struct Direction {
    signing_key: Zeroizing<[u8; 16]>,
    sealer: Rc4Stream,
    sequence: u32,
}

impl Direction {
    fn new(session_key: &[u8; 16], signing: &[u8], sealing: &[u8]) -> Self {
        let signing_key = Zeroizing::new(md5(&[session_key, signing]));
        let sealing_key = Zeroizing::new(md5(&[session_key, sealing]));
        Self {
            signing_key,
            sealer: Rc4Stream::new(&sealing_key),
            sequence: 0,
        }
    }

    /// Current sequence number; the counter moves on by one.
    fn advance(&mut self) -> u32 {
        let seq = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        seq
    }

    fn signature(&self, seq: u32, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        let seq_bytes = seq.to_le_bytes();
        let digest = hmac_md5(&self.signing_key[..], &[&seq_bytes, message]);
        let mut out = [0u8; SIGNATURE_LEN];
        out[..4].copy_from_slice(&SIGNATURE_VERSION.to_le_bytes());
        out[4..12].copy_from_slice(&digest[..8]);
        out[12..].copy_from_slice(&seq_bytes);
        out
    }
}

/// Signing and sealing state of one authenticated connection.
///
/// Sequence numbers start at zero and move by exactly one per protected or
/// verified message in their direction, failed verifications included.
pub struct SessionSecurity {
    key_exchange: bool,
    outbound: Direction,
    inbound: Direction,
}

impl SessionSecurity {
    pub fn new(session_key: &[u8; 16], key_exchange: bool, role: Role) -> Self {
        let client = Direction::new(session_key, CLIENT_SIGNING, CLIENT_SEALING);
        let server = Direction::new(session_key, SERVER_SIGNING, SERVER_SEALING);
        let (outbound, inbound) = match role {
            Role::Client => (client, server),
            Role::Server => (server, client),
        };
        Self {
            key_exchange,
            outbound,
            inbound,
        }
    }

    pub fn outbound_sequence(&self) -> u32 {
        self.outbound.sequence
    }

    pub fn inbound_sequence(&self) -> u32 {
        self.inbound.sequence
    }

    /// Signs `message` in place. Its last 16 bytes are the signature slot.
    pub fn sign(&mut self, message: &mut [u8]) -> Result<(), SecurityError> {
        let split = signature_offset(message)?;
        let seq = self.outbound.advance();
        let mut signature = self.outbound.signature(seq, &message[..split]);
        if self.key_exchange {
            self.outbound.sealer.apply(&mut signature[4..12]);
        }
        message[split..].copy_from_slice(&signature);
        Ok(())
    }

    /// Encrypts `body` and signs the plaintext message.
    pub fn seal(&mut self, message: &mut [u8], body: Range<usize>) -> Result<(), SecurityError> {
        let split = signature_offset(message)?;
        check_body(&body, split)?;
        let seq = self.outbound.advance();
        let mut signature = self.outbound.signature(seq, &message[..split]);
        self.outbound.sealer.apply(&mut message[body]);
        if self.key_exchange {
            self.outbound.sealer.apply(&mut signature[4..12]);
        }
        message[split..].copy_from_slice(&signature);
        Ok(())
    }

    /// Checks the signature of an inbound message.
    pub fn verify(&mut self, message: &mut [u8]) -> Result<(), SecurityError> {
        let split = signature_offset(message)?;
        let seq = self.inbound.advance();
        if self.key_exchange {
            self.inbound.sealer.apply(&mut message[split + 4..split + 12]);
        }
        let expected = self.inbound.signature(seq, &message[..split]);
        compare(&expected, &message[split..])
    }

    /// Decrypts `body` in place, then checks the signature.
    pub fn unseal(&mut self, message: &mut [u8], body: Range<usize>) -> Result<(), SecurityError> {
        let split = signature_offset(message)?;
        check_body(&body, split)?;
        let seq = self.inbound.advance();
        self.inbound.sealer.apply(&mut message[body]);
        if self.key_exchange {
            self.inbound.sealer.apply(&mut message[split + 4..split + 12]);
        }
        let expected = self.inbound.signature(seq, &message[..split]);
        compare(&expected, &message[split..])
    }
}

impl std::fmt::Debug for SessionSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSecurity")
            .field("key_exchange", &self.key_exchange)
            .field("outbound_sequence", &self.outbound.sequence)
            .field("inbound_sequence", &self.inbound.sequence)
            .finish()
    }
}

fn signature_offset(message: &[u8]) -> Result<usize, SecurityError> {
    message
        .len()
        .checked_sub(SIGNATURE_LEN)
        .ok_or(SecurityError::MessageTooShort(message.len()))
}

fn check_body(body: &Range<usize>, split: usize) -> Result<(), SecurityError> {
    if body.start > body.end || body.end > split {
        return Err(SecurityError::MessageTooShort(split + SIGNATURE_LEN));
    }
    Ok(())
}

fn compare(expected: &[u8; SIGNATURE_LEN], received: &[u8]) -> Result<(), SecurityError> {
    if bool::from(expected[..].ct_eq(received)) {
        Ok(())
    } else {
        Err(SecurityError::SignatureMismatch)
    }
}
