//! Loopback tests for TransportConnection

use super::*;
use crate::domain::binding::{AssociationGroup, AuthLevel, Binding};
use crate::domain::config::ConnectionConfig;
use crate::domain::errors::TransportError;
use crate::domain::framing::read_fragment;
use crate::domain::pdu::{self, PduHeader, HEADER_LEN, PFC_FIRST_FRAG, PFC_LAST_FRAG};
use crate::ports::outbound::{EndpointResolver, ResolutionError, SecurityError, SecurityProvider};
use shared_types::{SyntaxId, EVEN6_SYNTAX};
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const BOTH: u8 = PFC_FIRST_FRAG | PFC_LAST_FRAG;

// =============================================================================
// HELPERS
// =============================================================================

fn spawn_server<F>(script: F) -> (u16, JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        script(stream);
    });
    (port, handle)
}

fn read_pdu(stream: &mut TcpStream) -> Vec<u8> {
    read_fragment(stream, u16::MAX).unwrap()
}

/// Answers a bind with an acceptance and returns the bind PDU.
fn accept_bind(stream: &mut TcpStream, assoc_group: u32) -> Vec<u8> {
    let bind = read_pdu(stream);
    let call_id = PduHeader::parse(&bind).unwrap().call_id;
    let ack = pdu::encode_bind_ack(call_id, 1024, 1024, assoc_group, "135", 0);
    stream.write_all(&ack).unwrap();
    bind
}

fn connection(port: u16) -> TransportConnection {
    TransportConnection::new(
        Binding::new("127.0.0.1", EVEN6_SYNTAX).with_port(port),
        ConnectionConfig::for_testing(),
    )
}

// =============================================================================
// BIND
// =============================================================================

#[test]
fn test_bind_and_call_roundtrip() {
    let (port, server) = spawn_server(|mut stream| {
        accept_bind(&mut stream, 0x55);
        let request = read_pdu(&mut stream);
        let header = PduHeader::parse(&request).unwrap();
        assert_eq!(u16::from_le_bytes([request[22], request[23]]), 2);
        let mut stub = request[HEADER_LEN..].to_vec();
        stub.reverse();
        stream
            .write_all(&pdu::encode_response(header.call_id, BOTH, &stub))
            .unwrap();
    });

    let mut conn = connection(port);
    conn.bind().unwrap();
    assert!(conn.is_bound());
    assert_eq!(conn.association_group(), Some(AssociationGroup(0x55)));
    assert_eq!(conn.binding().max_recv_frag(), 1024);

    let reply = conn.call(2, &[1, 2, 3, 4]).unwrap();
    assert_eq!(reply, vec![4, 3, 2, 1]);
    server.join().unwrap();
}

#[test]
fn test_bind_sends_requested_association_group() {
    let (port, server) = spawn_server(|mut stream| {
        let bind = accept_bind(&mut stream, 0x99);
        assert_eq!(
            u32::from_le_bytes([bind[20], bind[21], bind[22], bind[23]]),
            0x1234
        );
    });

    let mut conn = connection(port).with_association_group(AssociationGroup(0x1234));
    conn.bind().unwrap();
    server.join().unwrap();
}

#[test]
fn test_bind_nak_is_rejection() {
    let (port, server) = spawn_server(|mut stream| {
        let bind = read_pdu(&mut stream);
        let call_id = PduHeader::parse(&bind).unwrap().call_id;
        let mut nak = pdu::encode_fault(call_id, 0);
        nak[2] = 13;
        nak[16] = 4;
        nak[17] = 0;
        stream.write_all(&nak).unwrap();
    });

    let mut conn = connection(port);
    assert_eq!(
        conn.bind().unwrap_err(),
        TransportError::BindRejected { reason: 4 }
    );
    assert!(!conn.is_bound());
    server.join().unwrap();
}

#[test]
fn test_rejected_presentation_context() {
    let (port, server) = spawn_server(|mut stream| {
        let bind = read_pdu(&mut stream);
        let call_id = PduHeader::parse(&bind).unwrap().call_id;
        let ack = pdu::encode_bind_ack(call_id, 1024, 1024, 1, "", 2);
        stream.write_all(&ack).unwrap();
    });

    let mut conn = connection(port);
    assert!(matches!(
        conn.bind(),
        Err(TransportError::BindRejected { .. })
    ));
    server.join().unwrap();
}

/// Acks a bind offering `max_recv` as the largest fragment the server takes.
fn small_frag_server(max_recv: u16, challenge: bool) -> (u16, JoinHandle<()>) {
    spawn_server(move |mut stream| {
        let bind = read_pdu(&mut stream);
        let call_id = PduHeader::parse(&bind).unwrap().call_id;
        let mut ack = pdu::encode_bind_ack(call_id, 1024, max_recv, 1, "135", 0);
        if challenge {
            pdu::append_auth_token(&mut ack, 0x0A, 5, b"CHALLENGE");
        }
        stream.write_all(&ack).unwrap();
    })
}

#[test]
fn test_transmit_size_must_fit_auth_overhead() {
    // 24 header + 3 pad + 8 trailer + 16 signature + 8 stub = 59
    let (port, server) = small_frag_server(58, true);
    let mut conn = connection(port).with_security(Box::new(MarkerProvider::default()));
    let err = conn.bind().unwrap_err();
    assert!(err.to_string().contains("too small"), "unexpected error: {err}");
    assert!(!conn.is_bound());
    server.join().unwrap();
}

#[test]
fn test_transmit_size_fits_header_and_eight_bytes() {
    let (port, server) = small_frag_server(31, false);
    assert!(connection(port).bind().is_err());
    server.join().unwrap();

    let (port, server) = small_frag_server(32, false);
    let mut conn = connection(port);
    conn.bind().unwrap();
    assert_eq!(conn.max_xmit_frag(), 32);
    server.join().unwrap();
}

struct CountingResolver {
    port: u16,
    calls: AtomicUsize,
}

impl EndpointResolver for CountingResolver {
    fn resolve(&self, host: &str, interface: &SyntaxId) -> Result<u16, ResolutionError> {
        assert_eq!(host, "127.0.0.1");
        assert_eq!(*interface, EVEN6_SYNTAX);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.port)
    }
}

#[test]
fn test_resolver_consulted_once_when_port_unknown() {
    let (port, server) = spawn_server(|mut stream| {
        accept_bind(&mut stream, 1);
    });
    let resolver = Arc::new(CountingResolver {
        port,
        calls: AtomicUsize::new(0),
    });

    let mut conn = TransportConnection::new(
        Binding::new("127.0.0.1", EVEN6_SYNTAX),
        ConnectionConfig::for_testing(),
    )
    .with_resolver(resolver.clone());
    conn.bind().unwrap();

    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    assert_eq!(conn.binding().port(), Some(port));
    server.join().unwrap();
}

#[test]
fn test_resolution_failure_is_fatal_to_bind() {
    struct Failing;
    impl EndpointResolver for Failing {
        fn resolve(&self, _: &str, _: &SyntaxId) -> Result<u16, ResolutionError> {
            Err(ResolutionError::NotRegistered)
        }
    }

    let mut conn = TransportConnection::new(
        Binding::new("127.0.0.1", EVEN6_SYNTAX),
        ConnectionConfig::for_testing(),
    )
    .with_resolver(Arc::new(Failing));
    assert_eq!(
        conn.bind().unwrap_err(),
        TransportError::Resolution(ResolutionError::NotRegistered)
    );
}

#[test]
fn test_no_port_and_no_resolver() {
    let mut conn = TransportConnection::new(
        Binding::new("127.0.0.1", EVEN6_SYNTAX),
        ConnectionConfig::for_testing(),
    );
    assert!(matches!(conn.bind(), Err(TransportError::NoEndpoint(_))));
}

// =============================================================================
// CALL
// =============================================================================

#[test]
fn test_call_before_bind() {
    let mut conn = connection(1);
    assert_eq!(conn.call(0, &[]).unwrap_err(), TransportError::NotBound);
}

#[test]
fn test_response_reassembled_across_fragments() {
    let (port, server) = spawn_server(|mut stream| {
        accept_bind(&mut stream, 1);
        let request = read_pdu(&mut stream);
        let call_id = PduHeader::parse(&request).unwrap().call_id;
        stream
            .write_all(&pdu::encode_response(call_id, PFC_FIRST_FRAG, &[1, 2, 3]))
            .unwrap();
        stream
            .write_all(&pdu::encode_response(call_id, 0, &[4, 5]))
            .unwrap();
        stream
            .write_all(&pdu::encode_response(call_id, PFC_LAST_FRAG, &[6]))
            .unwrap();
    });

    let mut conn = connection(port);
    conn.bind().unwrap();
    assert_eq!(conn.call(1, &[0; 8]).unwrap(), vec![1, 2, 3, 4, 5, 6]);
    server.join().unwrap();
}

#[test]
fn test_large_request_is_fragmented() {
    let (port, server) = spawn_server(|mut stream| {
        accept_bind(&mut stream, 1);
        let mut stub = Vec::new();
        let mut flags = Vec::new();
        loop {
            let fragment = read_pdu(&mut stream);
            assert!(fragment.len() <= 1024);
            let header = PduHeader::parse(&fragment).unwrap();
            flags.push(header.flags);
            stub.extend_from_slice(&fragment[HEADER_LEN..]);
            if header.is_last_fragment() {
                stream
                    .write_all(&pdu::encode_response(header.call_id, BOTH, &[0]))
                    .unwrap();
                break;
            }
        }
        assert_eq!(stub, (0..2500u32).map(|i| i as u8).collect::<Vec<_>>());
        assert_eq!(flags.first(), Some(&PFC_FIRST_FRAG));
        assert_eq!(flags.last(), Some(&PFC_LAST_FRAG));
        assert!(flags.len() >= 3);
    });

    let mut conn = connection(port);
    conn.bind().unwrap();
    let stub: Vec<u8> = (0..2500u32).map(|i| i as u8).collect();
    conn.call(0, &stub).unwrap();
    server.join().unwrap();
}

#[test]
fn test_fault_reports_status_and_keeps_connection() {
    let (port, server) = spawn_server(|mut stream| {
        accept_bind(&mut stream, 1);
        let request = read_pdu(&mut stream);
        let call_id = PduHeader::parse(&request).unwrap().call_id;
        stream.write_all(&pdu::encode_fault(call_id, 0x6F7)).unwrap();

        let request = read_pdu(&mut stream);
        let call_id = PduHeader::parse(&request).unwrap().call_id;
        stream
            .write_all(&pdu::encode_response(call_id, BOTH, &[7]))
            .unwrap();
    });

    let mut conn = connection(port);
    conn.bind().unwrap();
    assert_eq!(
        conn.call(4, &[0; 4]).unwrap_err(),
        TransportError::Fault { status: 0x6F7 }
    );
    assert!(conn.is_bound());
    assert_eq!(conn.call(4, &[0; 4]).unwrap(), vec![7]);
    server.join().unwrap();
}

#[test]
fn test_call_id_mismatch_drops_connection() {
    let (port, server) = spawn_server(|mut stream| {
        accept_bind(&mut stream, 1);
        let request = read_pdu(&mut stream);
        let call_id = PduHeader::parse(&request).unwrap().call_id;
        stream
            .write_all(&pdu::encode_response(call_id + 10, BOTH, &[7]))
            .unwrap();
    });

    let mut conn = connection(port);
    conn.bind().unwrap();
    assert!(matches!(
        conn.call(0, &[0; 4]),
        Err(TransportError::CallIdMismatch { .. })
    ));
    assert!(!conn.is_bound());
    server.join().unwrap();
}

#[test]
fn test_oversized_response_rejected() {
    let (port, server) = spawn_server(|mut stream| {
        accept_bind(&mut stream, 1);
        let request = read_pdu(&mut stream);
        let call_id = PduHeader::parse(&request).unwrap().call_id;
        let big = pdu::encode_response(call_id, BOTH, &vec![0u8; 1500]);
        let _ = stream.write_all(&big);
    });

    let mut conn = connection(port);
    conn.bind().unwrap();
    assert_eq!(
        conn.call(0, &[0; 4]).unwrap_err(),
        TransportError::FragmentTooLarge {
            declared: 1524,
            max: 1024
        }
    );
    server.join().unwrap();
}

#[test]
fn test_read_timeout_reported_as_timeout() {
    let (port, server) = spawn_server(|mut stream| {
        accept_bind(&mut stream, 1);
        let _request = read_pdu(&mut stream);
        thread::sleep(Duration::from_millis(600));
    });

    let mut conn = connection(port);
    conn.bind().unwrap();
    conn.set_read_timeout(Duration::from_millis(150)).unwrap();
    let err = conn.call(3, &[0; 4]).unwrap_err();
    assert!(err.is_timeout());
    assert!(!conn.is_bound());
    server.join().unwrap();
}

#[test]
fn test_peer_close_mid_response_is_error() {
    let (port, server) = spawn_server(|mut stream| {
        accept_bind(&mut stream, 1);
        let request = read_pdu(&mut stream);
        let call_id = PduHeader::parse(&request).unwrap().call_id;
        let full = pdu::encode_response(call_id, BOTH, &[9u8; 64]);
        stream.write_all(&full[..40]).unwrap();
    });

    let mut conn = connection(port);
    conn.bind().unwrap();
    assert_eq!(
        conn.call(0, &[0; 4]).unwrap_err(),
        TransportError::ShortRead {
            expected: 64,
            read: 16
        }
    );
    server.join().unwrap();
}

#[test]
fn test_abort_handle_unblocks_reader() {
    let (port, server) = spawn_server(|mut stream| {
        accept_bind(&mut stream, 1);
        let _request = read_pdu(&mut stream);
        thread::sleep(Duration::from_millis(1500));
    });

    let mut conn = connection(port);
    conn.bind().unwrap();
    conn.set_read_timeout(Duration::from_secs(10)).unwrap();
    let abort = conn.abort_handle().unwrap();

    let started = Instant::now();
    let aborter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        abort.abort();
    });
    assert!(conn.call(3, &[0; 4]).is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
    aborter.join().unwrap();
    server.join().unwrap();
}

#[test]
fn test_close_is_idempotent() {
    let (port, server) = spawn_server(|mut stream| {
        accept_bind(&mut stream, 1);
    });

    let mut conn = connection(port);
    conn.bind().unwrap();
    conn.close();
    conn.close();
    assert_eq!(conn.state(), BindState::Closed);
    assert_eq!(conn.call(0, &[]).unwrap_err(), TransportError::Closed);
    assert_eq!(conn.bind().unwrap_err(), TransportError::Closed);
    server.join().unwrap();
}

// =============================================================================
// SECURITY PROVIDER SEAM
// =============================================================================

/// Marks outbound verifiers with 0x11 and accepts inbound verifiers of 0x22.
#[derive(Default)]
struct MarkerProvider {
    established: bool,
    protected: Arc<AtomicUsize>,
}

impl SecurityProvider for MarkerProvider {
    fn auth_type(&self) -> u8 {
        0x0A
    }

    fn auth_level(&self) -> AuthLevel {
        AuthLevel::Integrity
    }

    fn negotiate_token(&mut self) -> Result<Vec<u8>, SecurityError> {
        Ok(b"NEGOTIATE".to_vec())
    }

    fn process_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SecurityError> {
        if challenge != b"CHALLENGE" {
            return Err(SecurityError::MalformedToken("bad challenge".into()));
        }
        self.established = true;
        Ok(b"AUTHENTICATE".to_vec())
    }

    fn is_established(&self) -> bool {
        self.established
    }

    fn protect(&mut self, pdu: &mut [u8], body: Range<usize>) -> Result<(), SecurityError> {
        assert_eq!(body.start, HEADER_LEN);
        let len = pdu.len();
        pdu[len - 16..].fill(0x11);
        self.protected.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn verify(&mut self, pdu: &mut [u8], _body: Range<usize>) -> Result<(), SecurityError> {
        if pdu[pdu.len() - 16..].iter().all(|b| *b == 0x22) {
            Ok(())
        } else {
            Err(SecurityError::SignatureMismatch)
        }
    }
}

fn authenticated_server(signature: u8) -> (u16, JoinHandle<()>) {
    spawn_server(move |mut stream| {
        let bind = read_pdu(&mut stream);
        let header = PduHeader::parse(&bind).unwrap();
        assert_eq!(pdu::auth_token(&bind, &header).unwrap(), b"NEGOTIATE");

        let mut ack = pdu::encode_bind_ack(header.call_id, 1024, 1024, 3, "135", 0);
        pdu::append_auth_token(&mut ack, 0x0A, 5, b"CHALLENGE");
        stream.write_all(&ack).unwrap();

        let auth3 = read_pdu(&mut stream);
        let auth3_header = PduHeader::parse(&auth3).unwrap();
        assert_eq!(auth3_header.ptype, 16);
        assert_eq!(pdu::auth_token(&auth3, &auth3_header).unwrap(), b"AUTHENTICATE");

        let request = read_pdu(&mut stream);
        let request_header = PduHeader::parse(&request).unwrap();
        assert_eq!(request_header.auth_length, 16);
        assert!(request[request.len() - 16..].iter().all(|b| *b == 0x11));

        let mut response = pdu::encode_response(request_header.call_id, BOTH, &[1, 2, 3]);
        pdu::append_verifier_slot(&mut response, 0x0A, 5, 16);
        let len = response.len();
        response[len - 16..].fill(signature);
        let _ = stream.write_all(&response);
    })
}

#[test]
fn test_security_provider_drives_handshake_and_protection() {
    let (port, server) = authenticated_server(0x22);
    let protected = Arc::new(AtomicUsize::new(0));
    let provider = MarkerProvider {
        established: false,
        protected: protected.clone(),
    };

    let mut conn = connection(port).with_security(Box::new(provider));
    conn.bind().unwrap();
    assert_eq!(conn.call(0, &[5; 8]).unwrap(), vec![1, 2, 3]);
    assert_eq!(protected.load(Ordering::SeqCst), 1);
    server.join().unwrap();
}

#[test]
fn test_signature_mismatch_aborts_connection() {
    let (port, server) = authenticated_server(0x33);
    let mut conn = connection(port).with_security(Box::new(MarkerProvider::default()));
    conn.bind().unwrap();

    assert_eq!(
        conn.call(0, &[5; 8]).unwrap_err(),
        TransportError::Security(SecurityError::SignatureMismatch)
    );
    assert!(!conn.is_bound());
    server.join().unwrap();
}
