//! # NTLMv2
//!
//! Response and session key computation for the AUTHENTICATE message.
//!
//! ```text
//! ResponseKeyNT = HMAC_MD5(MD4(UTF16(password)), UTF16(UPPER(user) + domain))
//! temp          = 01 01 | 00 00 | 00 00 00 00 | time | client challenge
//!                 | 00 00 00 00 | target info | 00 00 00 00
//! NTProofStr    = HMAC_MD5(ResponseKeyNT, server challenge + temp)
//! NtResponse    = NTProofStr + temp
//! LmResponse    = HMAC_MD5(ResponseKeyNT, server + client challenge) + client challenge
//! SessionBaseKey = HMAC_MD5(ResponseKeyNT, NTProofStr)
//! ```
//!
//! With key exchange the exported session key is random and travels
//! RC4-encrypted under the session base key.

use zeroize::Zeroizing;

use crate::domain::crypto::{hmac_md5, md4, rc4_once, utf16le};

/// Client randomness and time for one AUTHENTICATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientNonce {
    pub client_challenge: [u8; 8],
    /// FILETIME (100 ns ticks since 1601-01-01).
    pub timestamp: u64,
    /// Random key exported when key exchange is negotiated.
    pub exported_session_key: [u8; 16],
}

/// Output of the NTLMv2 computation.
#[derive(Debug, Clone)]
pub struct Ntlmv2Response {
    pub nt_response: Vec<u8>,
    pub lm_response: Vec<u8>,
    /// Empty without key exchange.
    pub encrypted_session_key: Vec<u8>,
    /// Key every signing and sealing key is derived from.
    pub session_key: Zeroizing<[u8; 16]>,
}

/// NTOWFv2.
pub fn response_key_nt(user: &str, domain: &str, password: &str) -> Zeroizing<[u8; 16]> {
    let nt_hash = Zeroizing::new(md4(&utf16le(password)));
    let identity = utf16le(&(user.to_uppercase() + domain));
    Zeroizing::new(hmac_md5(&nt_hash[..], &[&identity]))
}

/// Computes the responses and session key for `server_challenge`.
///
/// When the server supplied its own timestamp the LM response is all zeros.
pub fn compute(
    response_key: &[u8; 16],
    server_challenge: &[u8; 8],
    target_info: &[u8],
    server_timestamp: Option<u64>,
    nonce: &ClientNonce,
    key_exchange: bool,
) -> Ntlmv2Response {
    let timestamp = server_timestamp.unwrap_or(nonce.timestamp);

    let mut temp = Vec::with_capacity(28 + target_info.len() + 4);
    temp.extend_from_slice(&[0x01, 0x01, 0, 0, 0, 0, 0, 0]);
    temp.extend_from_slice(&timestamp.to_le_bytes());
    temp.extend_from_slice(&nonce.client_challenge);
    temp.extend_from_slice(&[0u8; 4]);
    temp.extend_from_slice(target_info);
    temp.extend_from_slice(&[0u8; 4]);

    let nt_proof = hmac_md5(response_key, &[server_challenge, &temp]);
    let mut nt_response = nt_proof.to_vec();
    nt_response.extend_from_slice(&temp);

    let lm_response = if server_timestamp.is_some() {
        vec![0u8; 24]
    } else {
        let mut lm = hmac_md5(response_key, &[server_challenge, &nonce.client_challenge]).to_vec();
        lm.extend_from_slice(&nonce.client_challenge);
        lm
    };

    let session_base_key = Zeroizing::new(hmac_md5(response_key, &[&nt_proof]));
    let (session_key, encrypted_session_key) = if key_exchange {
        let mut encrypted = nonce.exported_session_key;
        rc4_once(&session_base_key, &mut encrypted);
        (Zeroizing::new(nonce.exported_session_key), encrypted.to_vec())
    } else {
        (session_base_key, Vec::new())
    };

    Ntlmv2Response {
        nt_response,
        lm_response,
        encrypted_session_key,
        session_key,
    }
}

/// Recovers the session key from an AUTHENTICATE, as the server does.
pub fn server_session_key(
    response_key: &[u8; 16],
    nt_response: &[u8],
    encrypted_session_key: &[u8],
) -> Option<[u8; 16]> {
    let nt_proof = nt_response.get(..16)?;
    let session_base_key = hmac_md5(response_key, &[nt_proof]);
    if encrypted_session_key.is_empty() {
        return Some(session_base_key);
    }
    let mut exported: [u8; 16] = encrypted_session_key.try_into().ok()?;
    rc4_once(&session_base_key, &mut exported);
    Some(exported)
}
