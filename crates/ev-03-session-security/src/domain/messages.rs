//! # NTLM Messages
//!
//! NEGOTIATE, CHALLENGE and AUTHENTICATE. Strings are UTF-16LE; every
//! variable field is an 8-byte descriptor `len (u16) | max_len (u16) |
//! offset (u32)` pointing into the payload.
//!
//! ```text
//! NEGOTIATE     0 sig | 8 type=1 | 12 flags | 16 domain | 24 workstation
//! CHALLENGE     0 sig | 8 type=2 | 12 target name | 20 flags | 24 challenge
//!               32 reserved | 40 target info | payload
//! AUTHENTICATE  0 sig | 8 type=3 | 12 lm | 20 nt | 28 domain | 36 user
//!               44 workstation | 52 session key | 60 flags | 64 payload
//! ```

use crate::domain::crypto::utf16le;
use crate::domain::errors::NtlmError;

pub const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

pub const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
pub const REQUEST_TARGET: u32 = 0x0000_0004;
pub const NEGOTIATE_SIGN: u32 = 0x0000_0010;
pub const NEGOTIATE_SEAL: u32 = 0x0000_0020;
pub const NEGOTIATE_NTLM: u32 = 0x0000_0200;
pub const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
pub const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
pub const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
pub const NEGOTIATE_128: u32 = 0x2000_0000;
pub const NEGOTIATE_KEY_EXCH: u32 = 0x4000_0000;
pub const NEGOTIATE_56: u32 = 0x8000_0000;

const NEGOTIATE_LEN: usize = 32;
const CHALLENGE_MIN_LEN: usize = 48;
const AUTHENTICATE_HEADER_LEN: usize = 64;

/// AV pair id of the server timestamp in the target info.
const AV_TIMESTAMP: u16 = 7;
const AV_EOL: u16 = 0;

// =============================================================================
// NEGOTIATE
// =============================================================================

/// NEGOTIATE with no domain or workstation supplied.
pub fn encode_negotiate(flags: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(NEGOTIATE_LEN);
    out.extend_from_slice(SIGNATURE);
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&[0u8; 16]);
    out
}

// =============================================================================
// CHALLENGE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeMessage {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_name: Vec<u8>,
    pub target_info: Vec<u8>,
}

impl ChallengeMessage {
    pub fn parse(token: &[u8]) -> Result<Self, NtlmError> {
        check_header(token, 2, CHALLENGE_MIN_LEN, "CHALLENGE")?;
        let target_name = field(token, 12, "target_name")?.to_vec();
        let flags = read_u32(token, 20);
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&token[24..32]);
        let target_info = field(token, 40, "target_info")?.to_vec();
        Ok(Self {
            flags,
            server_challenge,
            target_name,
            target_info,
        })
    }

    /// Encodes the message as a server sends it.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CHALLENGE_MIN_LEN + self.target_name.len() + self.target_info.len());
        out.extend_from_slice(SIGNATURE);
        out.extend_from_slice(&2u32.to_le_bytes());
        let mut offset = CHALLENGE_MIN_LEN as u32;
        write_descriptor(&mut out, self.target_name.len(), &mut offset);
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.server_challenge);
        out.extend_from_slice(&[0u8; 8]);
        write_descriptor(&mut out, self.target_info.len(), &mut offset);
        out.extend_from_slice(&self.target_name);
        out.extend_from_slice(&self.target_info);
        out
    }

    /// Server FILETIME from the target info, if present.
    pub fn timestamp(&self) -> Option<u64> {
        av_pairs(&self.target_info)
            .find(|(id, value)| *id == AV_TIMESTAMP && value.len() == 8)
            .map(|(_, value)| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(value);
                u64::from_le_bytes(raw)
            })
    }
}

/// Iterates `(id, value)` pairs up to the terminator or the end of the data.
fn av_pairs(info: &[u8]) -> impl Iterator<Item = (u16, &[u8])> {
    let mut at = 0;
    std::iter::from_fn(move || {
        if at + 4 > info.len() {
            return None;
        }
        let id = u16::from_le_bytes([info[at], info[at + 1]]);
        let len = usize::from(u16::from_le_bytes([info[at + 2], info[at + 3]]));
        if id == AV_EOL || at + 4 + len > info.len() {
            return None;
        }
        let value = &info[at + 4..at + 4 + len];
        at += 4 + len;
        Some((id, value))
    })
}

// =============================================================================
// AUTHENTICATE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateMessage {
    pub flags: u32,
    pub lm_response: Vec<u8>,
    pub nt_response: Vec<u8>,
    pub domain: String,
    pub user: String,
    pub workstation: String,
    pub encrypted_session_key: Vec<u8>,
}

impl AuthenticateMessage {
    pub fn encode(&self) -> Vec<u8> {
        let domain = utf16le(&self.domain);
        let user = utf16le(&self.user);
        let workstation = utf16le(&self.workstation);
        let payloads: [&[u8]; 6] = [
            &self.lm_response,
            &self.nt_response,
            &domain,
            &user,
            &workstation,
            &self.encrypted_session_key,
        ];

        let total = AUTHENTICATE_HEADER_LEN + payloads.iter().map(|p| p.len()).sum::<usize>();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(SIGNATURE);
        out.extend_from_slice(&3u32.to_le_bytes());
        let mut offset = AUTHENTICATE_HEADER_LEN as u32;
        for payload in &payloads {
            write_descriptor(&mut out, payload.len(), &mut offset);
        }
        out.extend_from_slice(&self.flags.to_le_bytes());
        for payload in &payloads {
            out.extend_from_slice(payload);
        }
        out
    }

    /// Parses the message as a server receives it.
    pub fn parse(token: &[u8]) -> Result<Self, NtlmError> {
        check_header(token, 3, AUTHENTICATE_HEADER_LEN, "AUTHENTICATE")?;
        Ok(Self {
            lm_response: field(token, 12, "lm_response")?.to_vec(),
            nt_response: field(token, 20, "nt_response")?.to_vec(),
            domain: utf16_field(token, 28, "domain")?,
            user: utf16_field(token, 36, "user")?,
            workstation: utf16_field(token, 44, "workstation")?,
            encrypted_session_key: field(token, 52, "session_key")?.to_vec(),
            flags: read_u32(token, 60),
        })
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn check_header(
    token: &[u8],
    expected: u32,
    min_len: usize,
    message: &'static str,
) -> Result<(), NtlmError> {
    if token.len() < min_len {
        return Err(NtlmError::Truncated {
            message,
            len: token.len(),
        });
    }
    if &token[..8] != SIGNATURE {
        return Err(NtlmError::BadSignature);
    }
    let actual = read_u32(token, 8);
    if actual != expected {
        return Err(NtlmError::UnexpectedType { expected, actual });
    }
    Ok(())
}

fn write_descriptor(out: &mut Vec<u8>, len: usize, offset: &mut u32) {
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
    *offset += len as u32;
}

fn field<'a>(token: &'a [u8], at: usize, name: &'static str) -> Result<&'a [u8], NtlmError> {
    let len = usize::from(u16::from_le_bytes([token[at], token[at + 1]]));
    let offset = read_u32(token, at + 4) as usize;
    if len == 0 {
        return Ok(&[]);
    }
    token
        .get(offset..offset.saturating_add(len))
        .ok_or(NtlmError::FieldOutOfBounds {
            field: name,
            offset,
            len,
        })
}

fn utf16_field(token: &[u8], at: usize, name: &'static str) -> Result<String, NtlmError> {
    let raw = field(token, at, name)?;
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
