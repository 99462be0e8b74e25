//! # PDU Layout
//!
//! Encoding and decoding of the connection-oriented PDUs this client uses:
//! bind, bind-ack, bind-nak, auth3, request, response and fault.
//!
//! ## Common Header (16 bytes)
//!
//! ```text
//! 0  rpc_vers (5)      1  rpc_vers_minor (0)  2  ptype  3  pfc_flags
//! 4  data representation (4)
//! 8  frag_length (u16) 10 auth_length (u16)  12 call_id (u32)
//! ```
//!
//! Request and response PDUs add alloc hint, context id and opnum (or cancel
//! count), giving the fixed 24-byte header every receive starts with.

use shared_types::{SyntaxId, NDR_TRANSFER_SYNTAX};

use crate::domain::errors::TransportError;

pub const RPC_VERSION: u8 = 5;
pub const RPC_VERSION_MINOR: u8 = 0;

/// Common header length.
pub const COMMON_HEADER_LEN: usize = 16;
/// Request/response header length, and the first read of every receive.
pub const HEADER_LEN: usize = 24;

pub const FRAG_LENGTH_OFFSET: usize = 8;
pub const AUTH_LENGTH_OFFSET: usize = 10;
pub const CALL_ID_OFFSET: usize = 12;
pub const ALLOC_HINT_OFFSET: usize = 16;

pub const PFC_FIRST_FRAG: u8 = 0x01;
pub const PFC_LAST_FRAG: u8 = 0x02;

/// Little-endian integers, ASCII characters, IEEE floats.
pub const DATA_REPRESENTATION: [u8; 4] = [0x10, 0x00, 0x00, 0x00];

/// Security trailer length (before the token or verifier).
pub const SEC_TRAILER_LEN: usize = 8;
/// Trailer context id used for every authenticated PDU.
pub const AUTH_CONTEXT_ID: u32 = 79231;
/// Auth3 body: four arbitrary pad bytes.
const AUTH3_PAD: [u8; 4] = [0x56; 4];

const BIND_BODY_LEN: usize = 56;

/// PDU types used by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Request = 0,
    Response = 2,
    Fault = 3,
    Bind = 11,
    BindAck = 12,
    BindNak = 13,
    Auth3 = 16,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Request),
            2 => Some(Self::Response),
            3 => Some(Self::Fault),
            11 => Some(Self::Bind),
            12 => Some(Self::BindAck),
            13 => Some(Self::BindNak),
            16 => Some(Self::Auth3),
            _ => None,
        }
    }
}

/// Decoded common header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduHeader {
    pub ptype: u8,
    pub flags: u8,
    pub frag_length: u16,
    pub auth_length: u16,
    pub call_id: u32,
}

impl PduHeader {
    pub fn new(ptype: PacketType, flags: u8, call_id: u32) -> Self {
        Self {
            ptype: ptype as u8,
            flags,
            frag_length: 0,
            auth_length: 0,
            call_id,
        }
    }

    pub fn parse(pdu: &[u8]) -> Result<Self, TransportError> {
        if pdu.len() < COMMON_HEADER_LEN {
            return Err(TransportError::Malformed(format!(
                "{} bytes is shorter than the common header",
                pdu.len()
            )));
        }
        Ok(Self {
            ptype: pdu[2],
            flags: pdu[3],
            frag_length: read_u16(pdu, FRAG_LENGTH_OFFSET),
            auth_length: read_u16(pdu, AUTH_LENGTH_OFFSET),
            call_id: read_u32(pdu, CALL_ID_OFFSET),
        })
    }

    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_u8(self.ptype)
    }

    pub fn is_last_fragment(&self) -> bool {
        self.flags & PFC_LAST_FRAG != 0
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(RPC_VERSION);
        out.push(RPC_VERSION_MINOR);
        out.push(self.ptype);
        out.push(self.flags);
        out.extend_from_slice(&DATA_REPRESENTATION);
        out.extend_from_slice(&self.frag_length.to_le_bytes());
        out.extend_from_slice(&self.auth_length.to_le_bytes());
        out.extend_from_slice(&self.call_id.to_le_bytes());
    }
}

// =============================================================================
// BIND
// =============================================================================

/// Bind PDU with one presentation context (NDR transfer syntax).
pub fn encode_bind(
    call_id: u32,
    interface: &SyntaxId,
    max_xmit_frag: u16,
    max_recv_frag: u16,
    assoc_group: u32,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(COMMON_HEADER_LEN + BIND_BODY_LEN);
    PduHeader::new(PacketType::Bind, PFC_FIRST_FRAG | PFC_LAST_FRAG, call_id).write(&mut out);
    out.extend_from_slice(&max_xmit_frag.to_le_bytes());
    out.extend_from_slice(&max_recv_frag.to_le_bytes());
    out.extend_from_slice(&assoc_group.to_le_bytes());
    // one context element, one transfer syntax
    out.extend_from_slice(&[1, 0, 0, 0]);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&interface.to_wire());
    out.extend_from_slice(&NDR_TRANSFER_SYNTAX.to_wire());
    set_frag_length(&mut out);
    out
}

/// Fields of a bind-ack this client uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindAck {
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub assoc_group: u32,
    /// Presentation result of the first context (0 = acceptance).
    pub result: u16,
    pub reason: u16,
    /// Authentication token from the security trailer, if any.
    pub auth_token: Vec<u8>,
}

pub fn decode_bind_ack(pdu: &[u8]) -> Result<BindAck, TransportError> {
    let header = expect_type(pdu, PacketType::BindAck)?;
    let end = usize::from(header.frag_length).min(pdu.len());
    let need = |at: usize, len: usize| -> Result<(), TransportError> {
        if at + len > end {
            Err(TransportError::Malformed(format!(
                "bind-ack truncated at offset {}",
                at
            )))
        } else {
            Ok(())
        }
    };

    need(16, 10)?;
    let max_xmit_frag = read_u16(pdu, 16);
    let max_recv_frag = read_u16(pdu, 18);
    let assoc_group = read_u32(pdu, 20);
    let sec_addr_len = usize::from(read_u16(pdu, 24));

    // secondary address, then align to 4
    let mut at = 26 + sec_addr_len;
    at = (at + 3) & !3;
    need(at, 4)?;
    let n_results = pdu[at];
    at += 4;
    if n_results == 0 {
        return Err(TransportError::Malformed("bind-ack has no results".into()));
    }
    need(at, 4)?;
    let result = read_u16(pdu, at);
    let reason = read_u16(pdu, at + 2);

    let auth_token = auth_token(pdu, &header)?.to_vec();

    Ok(BindAck {
        max_xmit_frag,
        max_recv_frag,
        assoc_group,
        result,
        reason,
        auth_token,
    })
}

/// Bind-ack PDU as a server sends it, with one presentation result.
pub fn encode_bind_ack(
    call_id: u32,
    max_xmit_frag: u16,
    max_recv_frag: u16,
    assoc_group: u32,
    secondary_addr: &str,
    result: u16,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(84);
    PduHeader::new(PacketType::BindAck, PFC_FIRST_FRAG | PFC_LAST_FRAG, call_id).write(&mut out);
    out.extend_from_slice(&max_xmit_frag.to_le_bytes());
    out.extend_from_slice(&max_recv_frag.to_le_bytes());
    out.extend_from_slice(&assoc_group.to_le_bytes());
    let addr_len = secondary_addr.len() as u16 + 1;
    out.extend_from_slice(&addr_len.to_le_bytes());
    out.extend_from_slice(secondary_addr.as_bytes());
    out.push(0);
    pad_to_4(&mut out);
    out.extend_from_slice(&[1, 0, 0, 0]);
    out.extend_from_slice(&result.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&NDR_TRANSFER_SYNTAX.to_wire());
    set_frag_length(&mut out);
    out
}

/// Reject reason from a bind-nak.
pub fn decode_bind_nak(pdu: &[u8]) -> Result<u16, TransportError> {
    expect_type(pdu, PacketType::BindNak)?;
    if pdu.len() < COMMON_HEADER_LEN + 2 {
        return Err(TransportError::Malformed("bind-nak truncated".into()));
    }
    Ok(read_u16(pdu, COMMON_HEADER_LEN))
}

/// Auth3 PDU body; the caller appends the trailer and token.
pub fn encode_auth3(call_id: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(COMMON_HEADER_LEN + 4);
    PduHeader::new(PacketType::Auth3, PFC_FIRST_FRAG | PFC_LAST_FRAG, call_id).write(&mut out);
    out.extend_from_slice(&AUTH3_PAD);
    set_frag_length(&mut out);
    out
}

// =============================================================================
// REQUEST / RESPONSE / FAULT
// =============================================================================

/// One request fragment carrying `stub`.
pub fn encode_request(call_id: u32, opnum: u16, flags: u8, alloc_hint: u32, stub: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + stub.len());
    PduHeader::new(PacketType::Request, flags, call_id).write(&mut out);
    out.extend_from_slice(&alloc_hint.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&opnum.to_le_bytes());
    out.extend_from_slice(stub);
    set_frag_length(&mut out);
    out
}

/// One response fragment carrying `stub`.
pub fn encode_response(call_id: u32, flags: u8, stub: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + stub.len());
    PduHeader::new(PacketType::Response, flags, call_id).write(&mut out);
    out.extend_from_slice(&(stub.len() as u32).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(stub);
    set_frag_length(&mut out);
    out
}

/// Stub bytes of an unauthenticated (or already unwrapped) response.
pub fn response_stub(pdu: &[u8]) -> Result<&[u8], TransportError> {
    let header = expect_type(pdu, PacketType::Response)?;
    let end = usize::from(header.frag_length);
    if end < HEADER_LEN || end > pdu.len() {
        return Err(TransportError::Malformed(format!(
            "response frag_length {} invalid for {} bytes",
            end,
            pdu.len()
        )));
    }
    Ok(&pdu[HEADER_LEN..end])
}

/// Fault PDU carrying `status`.
pub fn encode_fault(call_id: u32, status: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + 8);
    PduHeader::new(PacketType::Fault, PFC_FIRST_FRAG | PFC_LAST_FRAG, call_id).write(&mut out);
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&status.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    set_frag_length(&mut out);
    out
}

/// Status code of a fault PDU.
pub fn decode_fault(pdu: &[u8]) -> Result<u32, TransportError> {
    expect_type(pdu, PacketType::Fault)?;
    if pdu.len() < HEADER_LEN + 4 {
        return Err(TransportError::Malformed("fault truncated".into()));
    }
    Ok(read_u32(pdu, HEADER_LEN))
}

// =============================================================================
// SECURITY TRAILER
// =============================================================================

/// Appends padding, the security trailer and `token`, then fixes up the
/// fragment and auth lengths. Used for bind and auth3.
pub fn append_auth_token(pdu: &mut Vec<u8>, auth_type: u8, auth_level: u8, token: &[u8]) {
    let pad = pad_to_4(pdu);
    write_trailer(pdu, auth_type, auth_level, pad);
    pdu.extend_from_slice(token);
    set_frag_length(pdu);
    set_auth_length(pdu, token.len() as u16);
}

/// Appends padding, the security trailer and a zeroed verifier slot of
/// `signature_len` bytes. Returns the body range a sealing provider encrypts
/// (stub plus padding).
pub fn append_verifier_slot(
    pdu: &mut Vec<u8>,
    auth_type: u8,
    auth_level: u8,
    signature_len: usize,
) -> std::ops::Range<usize> {
    let pad = pad_to_4(pdu);
    let body = HEADER_LEN..pdu.len();
    write_trailer(pdu, auth_type, auth_level, pad);
    pdu.resize(pdu.len() + signature_len, 0);
    set_frag_length(pdu);
    set_auth_length(pdu, signature_len as u16);
    body
}

/// Token bytes after the security trailer; empty when auth_length is zero.
pub fn auth_token<'a>(pdu: &'a [u8], header: &PduHeader) -> Result<&'a [u8], TransportError> {
    let auth_len = usize::from(header.auth_length);
    if auth_len == 0 {
        return Ok(&[]);
    }
    let end = usize::from(header.frag_length);
    if end > pdu.len() || end < COMMON_HEADER_LEN + SEC_TRAILER_LEN + auth_len {
        return Err(TransportError::Malformed(format!(
            "auth_length {} does not fit frag_length {}",
            auth_len, end
        )));
    }
    Ok(&pdu[end - auth_len..end])
}

/// Location of the protected parts of an authenticated response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthLayout {
    /// Range a sealing provider decrypts.
    pub body: std::ops::Range<usize>,
    /// Pad length from the trailer.
    pub pad: usize,
    /// Offset of the security trailer.
    pub trailer: usize,
}

pub fn auth_layout(pdu: &[u8]) -> Result<AuthLayout, TransportError> {
    let header = PduHeader::parse(pdu)?;
    let auth_len = usize::from(header.auth_length);
    let frag_len = usize::from(header.frag_length);
    if frag_len > pdu.len() || frag_len < HEADER_LEN + SEC_TRAILER_LEN + auth_len {
        return Err(TransportError::Malformed(format!(
            "auth_length {} does not fit frag_length {}",
            auth_len, frag_len
        )));
    }
    let trailer = frag_len - auth_len - SEC_TRAILER_LEN;
    let pad = usize::from(pdu[trailer + 2]);
    if HEADER_LEN + pad > trailer {
        return Err(TransportError::Malformed(format!("auth pad {} too large", pad)));
    }
    Ok(AuthLayout {
        body: HEADER_LEN..trailer,
        pad,
        trailer,
    })
}

/// Removes padding, trailer and verifier from a verified response and clears
/// the auth length.
pub fn strip_auth(pdu: &mut Vec<u8>, layout: &AuthLayout) {
    let new_len = layout.trailer - layout.pad;
    pdu.truncate(new_len);
    set_frag_length(pdu);
    set_auth_length(pdu, 0);
}

// =============================================================================
// HELPERS
// =============================================================================

fn expect_type(pdu: &[u8], expected: PacketType) -> Result<PduHeader, TransportError> {
    let header = PduHeader::parse(pdu)?;
    if header.ptype != expected as u8 {
        return Err(TransportError::UnexpectedPacket {
            expected: expected as u8,
            actual: header.ptype,
        });
    }
    Ok(header)
}

fn pad_to_4(pdu: &mut Vec<u8>) -> u8 {
    let pad = (4 - pdu.len() % 4) % 4;
    pdu.resize(pdu.len() + pad, 0);
    pad as u8
}

fn write_trailer(pdu: &mut Vec<u8>, auth_type: u8, auth_level: u8, pad: u8) {
    pdu.push(auth_type);
    pdu.push(auth_level);
    pdu.push(pad);
    pdu.push(0);
    pdu.extend_from_slice(&AUTH_CONTEXT_ID.to_le_bytes());
}

fn set_frag_length(pdu: &mut [u8]) {
    let len = pdu.len() as u16;
    pdu[FRAG_LENGTH_OFFSET..FRAG_LENGTH_OFFSET + 2].copy_from_slice(&len.to_le_bytes());
}

fn set_auth_length(pdu: &mut [u8], len: u16) {
    pdu[AUTH_LENGTH_OFFSET..AUTH_LENGTH_OFFSET + 2].copy_from_slice(&len.to_le_bytes());
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
