//! # Transport Connection
//!
//! Owns one socket. Binds (with optional authentication), sends request
//! fragments, receives and reassembles response fragments, and closes.
//!
//! ## Error Policy
//!
//! Any error other than a server fault or a state misuse drops the socket:
//! after a framing, network or authentication failure the byte stream cannot
//! be trusted and the caller must build a new connection.

use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::tcp;
use crate::domain::binding::{AssociationGroup, Binding};
use crate::domain::config::ConnectionConfig;
use crate::domain::errors::TransportError;
use crate::domain::framing::read_fragment;
use crate::domain::pdu::{self, PacketType, PduHeader, HEADER_LEN, PFC_FIRST_FRAG, PFC_LAST_FRAG};
use crate::ports::outbound::{EndpointResolver, SecurityError, SecurityProvider};

/// Largest possible alignment pad before a security trailer.
const MAX_AUTH_PAD: usize = 3;
const MIN_REQUEST_STUB: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindState {
    Unbound,
    Bound,
    Closed,
}

/// Shuts a connection's socket down from another thread.
///
/// A blocked read on the owning connection returns with an error.
#[derive(Debug)]
pub struct AbortHandle {
    stream: TcpStream,
}

impl AbortHandle {
    pub fn abort(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// One connection-oriented RPC connection over TCP.
pub struct TransportConnection {
    binding: Binding,
    config: ConnectionConfig,
    stream: Option<TcpStream>,
    state: BindState,
    security: Option<Box<dyn SecurityProvider>>,
    resolver: Option<Arc<dyn EndpointResolver>>,
    requested_group: Option<AssociationGroup>,
    association: Option<AssociationGroup>,
    max_xmit_frag: u16,
    call_id: u32,
}

impl TransportConnection {
    pub fn new(binding: Binding, config: ConnectionConfig) -> Self {
        let max_xmit_frag = config.max_xmit_frag;
        Self {
            binding,
            config,
            stream: None,
            state: BindState::Unbound,
            security: None,
            resolver: None,
            requested_group: None,
            association: None,
            max_xmit_frag,
            call_id: 0,
        }
    }

    /// Authenticate at bind and protect every request/response.
    #[must_use]
    pub fn with_security(mut self, provider: Box<dyn SecurityProvider>) -> Self {
        self.security = Some(provider);
        self
    }

    /// Resolver consulted at bind when the binding has no port.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn EndpointResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Join the session of an already bound connection.
    #[must_use]
    pub fn with_association_group(mut self, group: AssociationGroup) -> Self {
        self.requested_group = Some(group);
        self
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn state(&self) -> BindState {
        self.state
    }

    pub fn is_bound(&self) -> bool {
        self.state == BindState::Bound
    }

    /// Association group assigned by the server at bind.
    pub fn association_group(&self) -> Option<AssociationGroup> {
        self.association
    }

    /// Negotiated maximum size of an outgoing fragment.
    pub fn max_xmit_frag(&self) -> u16 {
        self.max_xmit_frag
    }

    // =========================================================================
    // BIND
    // =========================================================================

    /// Connects and negotiates the presentation context.
    ///
    /// Resolves the port first if the binding has none. With a security
    /// provider attached, the bind carries the negotiate token, the bind-ack
    /// challenge is processed and the confirmation goes out in an auth3 PDU.
    pub fn bind(&mut self) -> Result<(), TransportError> {
        match self.state {
            BindState::Bound => return Err(TransportError::AlreadyBound),
            BindState::Closed => return Err(TransportError::Closed),
            BindState::Unbound => {}
        }
        self.config.validate()?;

        let port = self.ensure_port()?;
        let stream = tcp::connect(self.binding.host(), port, &self.config)?;
        self.stream = Some(stream);

        match self.negotiate() {
            Ok(()) => {
                self.state = BindState::Bound;
                tracing::info!(
                    binding = %self.binding,
                    assoc_group = self.association.map(|g| g.0).unwrap_or(0),
                    authenticated = self.security.is_some(),
                    "bound"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(binding = %self.binding, error = %e, "bind failed");
                self.close();
                Err(e)
            }
        }
    }

    fn ensure_port(&mut self) -> Result<u16, TransportError> {
        if let Some(port) = self.binding.port() {
            return Ok(port);
        }
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| TransportError::NoEndpoint(self.binding.to_string()))?;
        let port = resolver.resolve(self.binding.host(), self.binding.interface())?;
        tracing::info!(binding = %self.binding, port, "epm port");
        self.binding.set_port(port);
        Ok(port)
    }

    fn negotiate(&mut self) -> Result<(), TransportError> {
        let call_id = self.next_call_id();
        let group = self.requested_group.map(|g| g.0).unwrap_or(0);
        let mut bind = pdu::encode_bind(
            call_id,
            self.binding.interface(),
            self.config.max_xmit_frag,
            self.config.max_recv_frag,
            group,
        );
        if let Some(security) = self.security.as_mut() {
            let token = security.negotiate_token()?;
            pdu::append_auth_token(
                &mut bind,
                security.auth_type(),
                security.auth_level() as u8,
                &token,
            );
        }
        self.write_all(&bind)?;

        let reply = self.read_raw(self.config.max_recv_frag)?;
        let header = PduHeader::parse(&reply)?;
        match header.packet_type() {
            Some(PacketType::BindAck) => {}
            Some(PacketType::BindNak) => {
                return Err(TransportError::BindRejected {
                    reason: pdu::decode_bind_nak(&reply)?,
                })
            }
            _ => {
                return Err(TransportError::UnexpectedPacket {
                    expected: PacketType::BindAck as u8,
                    actual: header.ptype,
                })
            }
        }
        if header.call_id != call_id {
            return Err(TransportError::CallIdMismatch {
                sent: call_id,
                received: header.call_id,
            });
        }

        let ack = pdu::decode_bind_ack(&reply)?;
        if ack.result != 0 {
            return Err(TransportError::BindRejected { reason: ack.reason });
        }
        let max_recv = self.config.max_recv_frag.min(ack.max_xmit_frag);
        let max_xmit = self.config.max_xmit_frag.min(ack.max_recv_frag);
        // a request fragment must fit the header, auth overhead and 8 stub bytes
        if usize::from(max_recv) <= HEADER_LEN
            || usize::from(max_xmit) < self.request_overhead() + MIN_REQUEST_STUB
        {
            return Err(TransportError::Malformed(format!(
                "negotiated fragment sizes too small (xmit {}, recv {})",
                max_xmit, max_recv
            )));
        }
        self.binding.set_max_recv_frag(max_recv);
        self.max_xmit_frag = max_xmit;
        self.association = Some(AssociationGroup(ack.assoc_group));

        let auth3 = match self.security.as_mut() {
            Some(security) => {
                if ack.auth_token.is_empty() {
                    return Err(SecurityError::MissingToken("bind-ack").into());
                }
                let token = security.process_challenge(&ack.auth_token)?;
                let mut auth3 = pdu::encode_auth3(call_id);
                pdu::append_auth_token(
                    &mut auth3,
                    security.auth_type(),
                    security.auth_level() as u8,
                    &token,
                );
                Some(auth3)
            }
            None => None,
        };
        if let Some(auth3) = auth3 {
            self.write_all(&auth3)?;
        }
        Ok(())
    }

    // =========================================================================
    // SEND / RECEIVE
    // =========================================================================

    /// Writes one PDU in full.
    ///
    /// Request PDUs are protected first when the security context is
    /// established.
    pub fn send(&mut self, pdu: Vec<u8>) -> Result<(), TransportError> {
        let result = self.send_inner(pdu);
        self.guard(result)
    }

    /// Reads one fragment.
    ///
    /// Authenticated responses and faults are verified (and unsealed) and
    /// returned without trailer or verifier.
    pub fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        let result = self.receive_inner();
        self.guard(result)
    }

    /// Sends one request, fragmenting the stub as needed, and returns the
    /// reassembled response stub.
    pub fn call(&mut self, opnum: u16, stub: &[u8]) -> Result<Vec<u8>, TransportError> {
        let result = self.call_inner(opnum, stub);
        self.guard(result)
    }

    fn call_inner(&mut self, opnum: u16, stub: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.ensure_bound()?;
        let call_id = self.next_call_id();
        let chunk = self.max_request_stub();
        let total = stub.len();

        let mut offset = 0;
        loop {
            let end = (offset + chunk).min(total);
            let mut flags = 0;
            if offset == 0 {
                flags |= PFC_FIRST_FRAG;
            }
            if end == total {
                flags |= PFC_LAST_FRAG;
            }
            let fragment =
                pdu::encode_request(call_id, opnum, flags, (total - offset) as u32, &stub[offset..end]);
            self.send_inner(fragment)?;
            offset = end;
            if offset >= total {
                break;
            }
        }
        tracing::debug!(call_id, opnum, stub_len = total, "request sent");

        let mut response = Vec::new();
        loop {
            let fragment = self.receive_inner()?;
            let header = PduHeader::parse(&fragment)?;
            if header.call_id != call_id {
                return Err(TransportError::CallIdMismatch {
                    sent: call_id,
                    received: header.call_id,
                });
            }
            match header.packet_type() {
                Some(PacketType::Response) => {
                    response.extend_from_slice(pdu::response_stub(&fragment)?);
                    if header.is_last_fragment() {
                        break;
                    }
                }
                Some(PacketType::Fault) => {
                    let status = pdu::decode_fault(&fragment)?;
                    tracing::debug!(call_id, opnum, status, "fault received");
                    return Err(TransportError::Fault { status });
                }
                _ => {
                    return Err(TransportError::UnexpectedPacket {
                        expected: PacketType::Response as u8,
                        actual: header.ptype,
                    })
                }
            }
        }
        tracing::debug!(call_id, opnum, stub_len = response.len(), "response received");
        Ok(response)
    }

    fn send_inner(&mut self, mut pdu: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_bound()?;
        let header = PduHeader::parse(&pdu)?;
        if header.packet_type() == Some(PacketType::Request) {
            if let Some(security) = self.security.as_mut() {
                if !security.is_established() {
                    return Err(SecurityError::NotEstablished.into());
                }
                let body = pdu::append_verifier_slot(
                    &mut pdu,
                    security.auth_type(),
                    security.auth_level() as u8,
                    security.signature_len(),
                );
                security.protect(&mut pdu, body)?;
            }
        }
        if pdu.len() > usize::from(self.max_xmit_frag) {
            return Err(TransportError::Malformed(format!(
                "fragment of {} bytes exceeds negotiated transmit size {}",
                pdu.len(),
                self.max_xmit_frag
            )));
        }
        self.write_all(&pdu)
    }

    fn receive_inner(&mut self) -> Result<Vec<u8>, TransportError> {
        self.ensure_bound()?;
        let mut fragment = self.read_raw(self.binding.max_recv_frag())?;
        let header = PduHeader::parse(&fragment)?;
        let protectable = matches!(
            header.packet_type(),
            Some(PacketType::Response) | Some(PacketType::Fault)
        );
        if !protectable {
            return Ok(fragment);
        }

        match self.security.as_mut() {
            Some(security) if header.auth_length > 0 => {
                let layout = pdu::auth_layout(&fragment)?;
                security.verify(&mut fragment, layout.body.clone())?;
                pdu::strip_auth(&mut fragment, &layout);
            }
            Some(_) if header.packet_type() == Some(PacketType::Response) => {
                return Err(SecurityError::MissingToken("response").into());
            }
            Some(_) => {}
            None if header.auth_length > 0 => {
                return Err(TransportError::Malformed(
                    "authenticated PDU on an unauthenticated connection".into(),
                ));
            }
            None => {}
        }
        Ok(fragment)
    }

    /// Header plus worst-case padding, trailer and signature of a request.
    fn request_overhead(&self) -> usize {
        HEADER_LEN
            + self
                .security
                .as_ref()
                .map(|s| MAX_AUTH_PAD + pdu::SEC_TRAILER_LEN + s.signature_len())
                .unwrap_or(0)
    }

    /// Stub bytes that fit one request fragment, rounded down to 8.
    ///
    /// Bind guarantees at least `MIN_REQUEST_STUB`.
    fn max_request_stub(&self) -> usize {
        let room = usize::from(self.max_xmit_frag).saturating_sub(self.request_overhead());
        (room & !7).max(MIN_REQUEST_STUB)
    }

    // =========================================================================
    // SOCKET
    // =========================================================================

    /// Changes the read budget for subsequent receives.
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.config.read_timeout = timeout;
        if let Some(stream) = self.stream.as_ref() {
            stream.set_read_timeout(tcp::read_timeout(timeout))?;
        }
        Ok(())
    }

    /// Handle for unblocking this connection's reads from another thread.
    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.stream
            .as_ref()
            .and_then(|s| s.try_clone().ok())
            .map(|stream| AbortHandle { stream })
    }

    /// Releases the socket. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            tracing::debug!(binding = %self.binding, "connection closed");
        }
        self.state = BindState::Closed;
    }

    fn guard<T>(&mut self, result: Result<T, TransportError>) -> Result<T, TransportError> {
        if let Err(e) = &result {
            if e.aborts_connection() && self.stream.is_some() {
                tracing::debug!(binding = %self.binding, error = %e, "dropping connection");
                self.close();
            }
        }
        result
    }

    fn ensure_bound(&self) -> Result<(), TransportError> {
        match self.state {
            BindState::Bound => Ok(()),
            BindState::Unbound => Err(TransportError::NotBound),
            BindState::Closed => Err(TransportError::Closed),
        }
    }

    fn next_call_id(&mut self) -> u32 {
        self.call_id = self.call_id.wrapping_add(1);
        self.call_id
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotBound)?;
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    fn read_raw(&mut self, max_frag: u16) -> Result<Vec<u8>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotBound)?;
        read_fragment(stream, max_frag)
    }
}

impl Drop for TransportConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConnection")
            .field("binding", &self.binding)
            .field("state", &self.state)
            .field("association", &self.association)
            .field("authenticated", &self.security.is_some())
            .finish()
    }
}
