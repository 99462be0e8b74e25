//! # NTLM Security Provider
//!
//! Implements the transport's `SecurityProvider` port. The transport owns
//! the trailer layout; this type produces tokens and protects PDUs.
//!
//! One provider per connection. A reconnect builds a new provider, which
//! performs a fresh handshake and starts both sequence numbers at zero.

use std::ops::Range;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ev_02_rpc_transport::{AuthLevel, SecurityError, SecurityProvider};
use rand::RngCore;

use crate::domain::errors::NtlmError;
use crate::domain::messages::{
    encode_negotiate, AuthenticateMessage, ChallengeMessage, NEGOTIATE_128, NEGOTIATE_56,
    NEGOTIATE_ALWAYS_SIGN, NEGOTIATE_EXTENDED_SESSIONSECURITY, NEGOTIATE_KEY_EXCH,
    NEGOTIATE_NTLM, NEGOTIATE_SEAL, NEGOTIATE_SIGN, NEGOTIATE_UNICODE, REQUEST_TARGET,
};
use crate::domain::ntlmv2::{self, ClientNonce};
use crate::domain::session::{Role, SessionSecurity};
use crate::ports::outbound::CredentialProvider;

/// Auth type tag for NTLM in the security trailer.
pub const AUTH_TYPE_NTLM: u8 = 0x0A;

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET: u64 = 11_644_473_600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    Initial,
    Negotiated,
    Established,
}

pub struct NtlmSecurityProvider {
    credentials: Arc<dyn CredentialProvider>,
    level: AuthLevel,
    state: HandshakeState,
    session: Option<SessionSecurity>,
}

impl NtlmSecurityProvider {
    pub fn new(credentials: Arc<dyn CredentialProvider>, level: AuthLevel) -> Self {
        Self {
            credentials,
            level,
            state: HandshakeState::Initial,
            session: None,
        }
    }

    /// Flags offered in NEGOTIATE.
    fn offered_flags(&self) -> u32 {
        let mut flags = NEGOTIATE_UNICODE
            | REQUEST_TARGET
            | NEGOTIATE_SIGN
            | NEGOTIATE_NTLM
            | NEGOTIATE_ALWAYS_SIGN
            | NEGOTIATE_EXTENDED_SESSIONSECURITY
            | NEGOTIATE_128
            | NEGOTIATE_KEY_EXCH
            | NEGOTIATE_56;
        if self.level.is_privacy() {
            flags |= NEGOTIATE_SEAL;
        }
        flags
    }

    /// Flags the server must echo for the protection level.
    fn required_flags(&self) -> u32 {
        let mut flags = NEGOTIATE_SIGN | NEGOTIATE_EXTENDED_SESSIONSECURITY;
        if self.level.is_privacy() {
            flags |= NEGOTIATE_SEAL;
        }
        flags
    }

    /// Answers a CHALLENGE with the given client randomness.
    fn authenticate(
        &mut self,
        challenge: &ChallengeMessage,
        nonce: &ClientNonce,
    ) -> Result<Vec<u8>, NtlmError> {
        if self.state != HandshakeState::Negotiated {
            return Err(NtlmError::OutOfOrder("challenge before negotiate"));
        }
        let required = self.required_flags();
        if challenge.flags & required != required {
            return Err(NtlmError::MissingFlags(required & !challenge.flags));
        }
        let flags = challenge.flags & self.offered_flags();
        let key_exchange = flags & NEGOTIATE_KEY_EXCH != 0;

        let creds = self.credentials.credentials()?;
        let response_key = ntlmv2::response_key_nt(&creds.user, &creds.domain, &creds.password);
        let response = ntlmv2::compute(
            &response_key,
            &challenge.server_challenge,
            &challenge.target_info,
            challenge.timestamp(),
            nonce,
            key_exchange,
        );

        let token = AuthenticateMessage {
            flags,
            lm_response: response.lm_response,
            nt_response: response.nt_response,
            domain: creds.domain.clone(),
            user: creds.user.clone(),
            workstation: creds.workstation.clone(),
            encrypted_session_key: response.encrypted_session_key,
        }
        .encode();

        self.session = Some(SessionSecurity::new(
            &response.session_key,
            key_exchange,
            Role::Client,
        ));
        self.state = HandshakeState::Established;
        tracing::debug!(
            user = %creds.user,
            domain = %creds.domain,
            flags = format_args!("{:#010x}", flags),
            "ntlm authenticated"
        );
        Ok(token)
    }

    fn session(&mut self) -> Result<&mut SessionSecurity, SecurityError> {
        self.session.as_mut().ok_or(SecurityError::NotEstablished)
    }
}

impl SecurityProvider for NtlmSecurityProvider {
    fn auth_type(&self) -> u8 {
        AUTH_TYPE_NTLM
    }

    fn auth_level(&self) -> AuthLevel {
        self.level
    }

    fn negotiate_token(&mut self) -> Result<Vec<u8>, SecurityError> {
        if self.state != HandshakeState::Initial {
            return Err(NtlmError::OutOfOrder("negotiate sent twice").into());
        }
        self.state = HandshakeState::Negotiated;
        Ok(encode_negotiate(self.offered_flags()))
    }

    fn process_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let challenge = ChallengeMessage::parse(challenge)?;
        let nonce = fresh_nonce();
        Ok(self.authenticate(&challenge, &nonce)?)
    }

    fn is_established(&self) -> bool {
        self.state == HandshakeState::Established
    }

    fn protect(&mut self, pdu: &mut [u8], body: Range<usize>) -> Result<(), SecurityError> {
        let privacy = self.level.is_privacy();
        let session = self.session()?;
        if privacy {
            session.seal(pdu, body)
        } else {
            session.sign(pdu)
        }
    }

    fn verify(&mut self, pdu: &mut [u8], body: Range<usize>) -> Result<(), SecurityError> {
        let privacy = self.level.is_privacy();
        let session = self.session()?;
        if privacy {
            session.unseal(pdu, body)
        } else {
            session.verify(pdu)
        }
    }
}

impl std::fmt::Debug for NtlmSecurityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NtlmSecurityProvider")
            .field("level", &self.level)
            .field("state", &self.state)
            .field("session", &self.session)
            .finish()
    }
}

fn fresh_nonce() -> ClientNonce {
    let mut rng = rand::thread_rng();
    let mut client_challenge = [0u8; 8];
    let mut exported_session_key = [0u8; 16];
    rng.fill_bytes(&mut client_challenge);
    rng.fill_bytes(&mut exported_session_key);
    ClientNonce {
        client_challenge,
        timestamp: filetime_now(),
        exported_session_key,
    }
}

/// Current time as FILETIME.
fn filetime_now() -> u64 {
    let since_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (since_unix.as_secs() + FILETIME_UNIX_OFFSET) * 10_000_000
        + u64::from(since_unix.subsec_nanos() / 100)
}
