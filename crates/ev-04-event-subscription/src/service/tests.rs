use std::collections::VecDeque;
use std::io;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use ev_02_rpc_transport::{AssociationGroup, TransportError};
use parking_lot::{Condvar, Mutex};
use shared_types::ContextHandle;

use super::*;
use crate::domain::config::WatcherConfig;
use crate::domain::errors::EventLogError;
use crate::domain::messages::fixtures::{
    encode_batch, encode_close_response, encode_registration, encode_status,
};
use crate::domain::messages::{encode_handle, Operation, Registration, RpcInfo};
use crate::domain::progress::EventLogProgress;
use crate::domain::query::{EventLogQuery, SubscriptionRequest};
use crate::domain::record::fixtures::batch_response;
use crate::domain::record::EventBatch;
use crate::ports::inbound::{SubscriptionApi, WaitStatus};
use crate::ports::outbound::{
    Abort, ChannelFactory, EventDecoder, RpcChannel, StructuredEvent,
};

const HANDLE: ContextHandle = ContextHandle::from_bytes([0x11; 20]);
const CONTROL: ContextHandle = ContextHandle::from_bytes([0x22; 20]);
const PULL_PORT: u16 = 49667;
const GROUP: AssociationGroup = AssociationGroup(0x0000_5e1d);

// =============================================================================
// MOCK SERVER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Pull,
    Wait,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Open(Kind),
    Call(Kind, u16, Vec<u8>),
    Close(Kind),
    Abort(Kind),
}

enum Reply {
    Stub(Vec<u8>),
    Fail(TransportError),
    /// Blocks until the channel is aborted, then fails with an I/O error.
    Block,
}

#[derive(Default)]
struct Script {
    pull: VecDeque<Reply>,
    wait: VecDeque<Reply>,
    log: Vec<Entry>,
    pull_opens: usize,
    wait_opens: Vec<(Option<u16>, Option<AssociationGroup>)>,
    fail_open_pull: Option<TransportError>,
    wait_open_delay: Duration,
}

/// Scripted even6 server. Exhausted pull replies fail with a reset,
/// exhausted wait replies block.
#[derive(Default)]
struct MockServer {
    script: Arc<Mutex<Script>>,
}

impl MockServer {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn pull(&self, reply: Reply) -> &Self {
        self.script.lock().pull.push_back(reply);
        self
    }

    fn wait(&self, reply: Reply) -> &Self {
        self.script.lock().wait.push_back(reply);
        self
    }

    fn fail_open_pull(&self, error: TransportError) {
        self.script.lock().fail_open_pull = Some(error);
    }

    /// Makes opening a wait connection take `delay`.
    fn delay_open_wait(&self, delay: Duration) {
        self.script.lock().wait_open_delay = delay;
    }

    fn log(&self) -> Vec<Entry> {
        self.script.lock().log.clone()
    }

    fn opnums(&self, kind: Kind) -> Vec<u16> {
        self.log()
            .into_iter()
            .filter_map(|e| match e {
                Entry::Call(k, opnum, _) if k == kind => Some(opnum),
                _ => None,
            })
            .collect()
    }

    fn stubs(&self, kind: Kind, opnum: u16) -> Vec<Vec<u8>> {
        self.log()
            .into_iter()
            .filter_map(|e| match e {
                Entry::Call(k, op, stub) if k == kind && op == opnum => Some(stub),
                _ => None,
            })
            .collect()
    }

    fn pull_opens(&self) -> usize {
        self.script.lock().pull_opens
    }

    fn wait_opens(&self) -> Vec<(Option<u16>, Option<AssociationGroup>)> {
        self.script.lock().wait_opens.clone()
    }

    fn channel(&self, kind: Kind) -> Box<dyn RpcChannel> {
        self.script.lock().log.push(Entry::Open(kind));
        Box::new(MockChannel {
            script: Arc::clone(&self.script),
            kind,
            abort: Arc::new(AbortFlag::default()),
            closed: false,
        })
    }
}

impl ChannelFactory for MockServer {
    fn open_pull(&self) -> Result<Box<dyn RpcChannel>, TransportError> {
        {
            let mut script = self.script.lock();
            if let Some(error) = script.fail_open_pull.clone() {
                return Err(error);
            }
            script.pull_opens += 1;
        }
        Ok(self.channel(Kind::Pull))
    }

    fn open_wait(
        &self,
        port: Option<u16>,
        group: Option<AssociationGroup>,
    ) -> Result<Box<dyn RpcChannel>, TransportError> {
        let delay = {
            let mut script = self.script.lock();
            script.wait_opens.push((port, group));
            script.wait_open_delay
        };
        std::thread::sleep(delay);
        Ok(self.channel(Kind::Wait))
    }
}

#[derive(Default)]
struct AbortFlag {
    aborted: Mutex<bool>,
    cv: Condvar,
}

struct MockChannel {
    script: Arc<Mutex<Script>>,
    kind: Kind,
    abort: Arc<AbortFlag>,
    closed: bool,
}

impl RpcChannel for MockChannel {
    fn call(
        &mut self,
        opnum: u16,
        stub: &[u8],
        _read_timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let reply = {
            let mut script = self.script.lock();
            script.log.push(Entry::Call(self.kind, opnum, stub.to_vec()));
            match self.kind {
                Kind::Pull => script.pull.pop_front().unwrap_or_else(|| Reply::Fail(reset())),
                Kind::Wait => script.wait.pop_front().unwrap_or(Reply::Block),
            }
        };
        match reply {
            Reply::Stub(stub) => Ok(stub),
            Reply::Fail(error) => Err(error),
            Reply::Block => {
                let deadline = Instant::now() + Duration::from_secs(5);
                let mut aborted = self.abort.aborted.lock();
                while !*aborted {
                    if self.abort.cv.wait_until(&mut aborted, deadline).timed_out() {
                        break;
                    }
                }
                Err(reset())
            }
        }
    }

    fn port(&self) -> Option<u16> {
        Some(PULL_PORT)
    }

    fn association_group(&self) -> Option<AssociationGroup> {
        Some(GROUP)
    }

    fn abort_handle(&self) -> Option<Box<dyn Abort>> {
        Some(Box::new(MockAbort {
            script: Arc::clone(&self.script),
            kind: self.kind,
            flag: Arc::clone(&self.abort),
        }))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.script.lock().log.push(Entry::Close(self.kind));
        }
    }
}

struct MockAbort {
    script: Arc<Mutex<Script>>,
    kind: Kind,
    flag: Arc<AbortFlag>,
}

impl Abort for MockAbort {
    fn abort(&self) {
        self.script.lock().log.push(Entry::Abort(self.kind));
        *self.flag.aborted.lock() = true;
        self.flag.cv.notify_all();
    }
}

/// Reads the record id out of the fixture payload `event <id>`.
struct TextDecoder;

impl EventDecoder for TextDecoder {
    fn decode(
        &self,
        buffer: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<StructuredEvent, EventLogError> {
        let text = std::str::from_utf8(&buffer[offset..offset + length])
            .map_err(|e| EventLogError::EventDecode(e.to_string()))?;
        let record_id = text
            .trim_start_matches("event ")
            .parse()
            .map_err(|_| EventLogError::EventDecode(text.to_string()))?;
        Ok(StructuredEvent {
            record_id,
            time_created: Utc.timestamp_opt(1_700_000_000, 0).single(),
            ..Default::default()
        })
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn reset() -> TransportError {
    TransportError::Io {
        kind: io::ErrorKind::ConnectionReset,
        message: "connection reset by peer".into(),
    }
}

fn registration(status: u32) -> Reply {
    Reply::Stub(encode_registration(&Registration {
        handle: HANDLE,
        control: CONTROL,
        channels: vec![],
        error: RpcInfo::default(),
        status,
    }))
}

fn batch(ids: &[u64]) -> Reply {
    Reply::Stub(encode_batch(&batch_response(ids)))
}

fn ready() -> Reply {
    Reply::Stub(encode_status(0))
}

/// Replies for cancel plus two closes.
fn script_shutdown(server: &MockServer) {
    server
        .pull(Reply::Stub(encode_status(0)))
        .pull(Reply::Stub(encode_close_response(0)))
        .pull(Reply::Stub(encode_close_response(0)));
}

fn request() -> SubscriptionRequest {
    SubscriptionRequest::new(EventLogQuery::new("Security", "*"))
}

fn session(server: &Arc<MockServer>) -> Arc<SubscriptionSession> {
    Arc::new(SubscriptionSession::new(Arc::clone(server) as Arc<dyn ChannelFactory>))
}

fn watcher(server: &Arc<MockServer>) -> SubscriptionWatcher {
    SubscriptionWatcher::new(session(server), request()).with_config(WatcherConfig::for_testing())
}

type Results = mpsc::Receiver<Result<EventBatch, EventLogError>>;
type Snapshots = Arc<Mutex<Vec<EventLogProgress>>>;

fn start(watcher: &SubscriptionWatcher) -> (Results, Snapshots) {
    let (tx, rx) = mpsc::channel();
    let snapshots: Snapshots = Arc::default();
    let sink = Arc::clone(&snapshots);
    watcher
        .start(
            Box::new(move |result: Result<EventBatch, EventLogError>| {
                let _ = tx.send(result);
            }),
            Some(Box::new(move |progress: &EventLogProgress| {
                sink.lock().push(progress.clone())
            })),
        )
        .unwrap();
    (rx, snapshots)
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

const RECV: Duration = Duration::from_secs(5);

// =============================================================================
// WATCHER
// =============================================================================

#[test]
fn test_short_batch_returns_to_waiting() {
    let server = MockServer::new();
    server.pull(registration(0)).pull(batch(&[100, 101, 102]));
    server.wait(ready());
    script_shutdown(&server);

    let watcher = watcher(&server).with_decoder(Arc::new(TextDecoder));
    let (rx, snapshots) = start(&watcher);

    let batch = rx.recv_timeout(RECV).unwrap().unwrap();
    assert_eq!(batch.len(), 3);
    let ids: Vec<u64> = batch.records().iter().map(|r| r.record_id).collect();
    assert_eq!(ids, vec![100, 101, 102]);
    assert!(batch.records().windows(2).all(|w| w[0].offset <= w[1].offset));

    // three of five requested: back to waiting, no second pull
    wait_until("second wait", || server.opnums(Kind::Wait).len() == 2);
    assert_eq!(server.opnums(Kind::Pull), vec![0, 2]);
    // pull stub carries the protocol timeout in milliseconds
    let next = &server.stubs(Kind::Pull, 2)[0];
    assert_eq!(&next[20..28], &[5u32.to_le_bytes(), 200u32.to_le_bytes()].concat()[..]);

    let last = snapshots.lock().last().cloned().unwrap();
    assert_eq!(last.last_record_id, Some(102));
    assert_eq!(last.last_event_created, Utc.timestamp_opt(1_700_000_000, 0).single());
    assert!(last.last_wait_time.is_some());
    assert!(last.last_pull_time.is_some());
    assert_eq!(last.connection_error, None);

    watcher.close();
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_full_batch_pulls_again() {
    let server = MockServer::new();
    server
        .pull(registration(0))
        .pull(batch(&[1, 2, 3, 4, 5]))
        .pull(batch(&[6]));
    server.wait(ready());
    script_shutdown(&server);

    let watcher = watcher(&server);
    let (rx, _) = start(&watcher);

    assert_eq!(rx.recv_timeout(RECV).unwrap().unwrap().len(), 5);
    assert_eq!(rx.recv_timeout(RECV).unwrap().unwrap().len(), 1);
    wait_until("second wait", || server.opnums(Kind::Wait).len() == 2);
    assert_eq!(server.opnums(Kind::Pull), vec![0, 2, 2]);

    watcher.close();
}

#[test]
fn test_close_cancels_then_closes_handles() {
    let server = MockServer::new();
    server.pull(registration(0)).pull(batch(&[7]));
    server.wait(ready());
    script_shutdown(&server);

    let watcher = watcher(&server);
    let (rx, _) = start(&watcher);
    rx.recv_timeout(RECV).unwrap().unwrap();
    wait_until("second wait", || server.opnums(Kind::Wait).len() == 2);

    watcher.close();

    assert_eq!(server.opnums(Kind::Pull), vec![0, 2, 14, 13, 13]);
    assert_eq!(server.stubs(Kind::Pull, 14), vec![encode_handle(&CONTROL)]);
    assert_eq!(
        server.stubs(Kind::Pull, 13),
        vec![encode_handle(&HANDLE), encode_handle(&CONTROL)]
    );
    assert_eq!(server.stubs(Kind::Wait, 3)[0], encode_handle(&HANDLE));

    let log = server.log();
    assert!(log.contains(&Entry::Abort(Kind::Wait)));
    assert!(log.contains(&Entry::Close(Kind::Wait)));
    assert!(log.contains(&Entry::Close(Kind::Pull)));
    assert!(watcher.session().is_closed());

    // the worker stopped quietly
    assert!(rx.try_recv().is_err());

    // idempotent
    watcher.close();
    assert_eq!(server.opnums(Kind::Pull).len(), 5);
}

#[test]
fn test_close_while_wait_connection_opens() {
    let server = MockServer::new();
    server.pull(registration(0));
    script_shutdown(&server);
    server.delay_open_wait(Duration::from_millis(300));

    let watcher = watcher(&server);
    let (rx, _) = start(&watcher);
    wait_until("wait open", || !server.wait_opens().is_empty());
    watcher.close();

    // close() returned only after the late connection was opened and dropped
    let log = server.log();
    let opened = log.iter().position(|e| *e == Entry::Open(Kind::Wait));
    let closed = log.iter().position(|e| *e == Entry::Close(Kind::Wait));
    assert!(opened.is_some() && closed > opened, "log: {log:?}");
    assert!(server.opnums(Kind::Wait).is_empty());
    assert_eq!(server.opnums(Kind::Pull), vec![0, 14, 13, 13]);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_wait_timeouts_reopen_wait_connection() {
    let server = MockServer::new();
    server.pull(registration(0)).pull(batch(&[]));
    server
        .wait(Reply::Fail(TransportError::Timeout))
        .wait(Reply::Fail(TransportError::Timeout))
        .wait(ready());
    script_shutdown(&server);

    let watcher = watcher(&server);
    let (_rx, snapshots) = start(&watcher);

    wait_until("fourth wait", || server.opnums(Kind::Wait).len() == 4);
    assert_eq!(server.pull_opens(), 1);
    assert_eq!(
        server.wait_opens(),
        vec![(Some(PULL_PORT), Some(GROUP)); 3]
    );
    assert_eq!(watcher.session().wait_reconnects(), 2);
    assert!(!watcher.session().io_failed());
    assert_eq!(snapshots.lock().last().unwrap().wait_reconnects, 2);

    watcher.close();
}

#[test]
fn test_pull_io_failure_skips_server_cleanup() {
    let server = MockServer::new();
    server.pull(registration(0)).pull(Reply::Fail(reset()));
    server.wait(ready());

    let watcher = watcher(&server);
    let (rx, snapshots) = start(&watcher);

    let err = rx.recv_timeout(RECV).unwrap().unwrap_err();
    assert!(err.is_io());
    wait_until("error progress", || {
        snapshots
            .lock()
            .last()
            .map_or(false, |p| p.connection_error.is_some())
    });
    assert!(watcher.session().io_failed());

    watcher.close();

    assert_eq!(server.opnums(Kind::Pull), vec![0, 2]);
    let log = server.log();
    assert!(log.contains(&Entry::Close(Kind::Pull)));
    assert!(log.contains(&Entry::Close(Kind::Wait)));
}

#[test]
fn test_register_status_is_fatal() {
    let server = MockServer::new();
    server.pull(registration(0x0000_3a9f));

    let watcher = watcher(&server);
    let (rx, snapshots) = start(&watcher);

    let expected = EventLogError::ServerStatus {
        operation: Operation::Register,
        status: 0x0000_3a9f,
    };
    assert_eq!(rx.recv_timeout(RECV).unwrap().unwrap_err(), expected);
    wait_until("error progress", || {
        snapshots
            .lock()
            .last()
            .map_or(false, |p| p.connection_error.is_some())
    });
    assert_eq!(
        snapshots.lock().last().unwrap().connection_error,
        Some(expected)
    );
    assert!(server.opnums(Kind::Wait).is_empty());

    watcher.close();
}

#[test]
fn test_panicking_progress_callback_is_ignored() {
    let server = MockServer::new();
    server.pull(registration(0)).pull(batch(&[9]));
    server.wait(ready());
    script_shutdown(&server);

    let watcher = watcher(&server);
    let (tx, rx) = mpsc::channel();
    watcher
        .start(
            Box::new(move |result: Result<EventBatch, EventLogError>| {
                let _ = tx.send(result);
            }),
            Some(Box::new(|_: &EventLogProgress| panic!("progress sink failed"))),
        )
        .unwrap();

    assert_eq!(rx.recv_timeout(RECV).unwrap().unwrap().len(), 1);
    watcher.close();
}

#[test]
fn test_bookmark_with_reverse_query_rejected_before_connecting() {
    let server = MockServer::new();
    let request =
        SubscriptionRequest::new(EventLogQuery::new("Security", "*").reversed()).with_bookmark("<BookmarkList/>");
    let watcher = SubscriptionWatcher::new(session(&server), request);

    let result = watcher.start(Box::new(|_: Result<EventBatch, EventLogError>| {}), None);
    assert!(matches!(result, Err(EventLogError::InvalidQuery(_))));
    assert_eq!(server.pull_opens(), 0);
}

#[test]
fn test_start_twice_fails() {
    let server = MockServer::new();
    server.pull(registration(0));
    script_shutdown(&server);

    let watcher = watcher(&server);
    let _ = start(&watcher);
    assert!(watcher.start(Box::new(|_: Result<EventBatch, EventLogError>| {}), None).is_err());
    watcher.close();

    assert_eq!(
        watcher.start(Box::new(|_: Result<EventBatch, EventLogError>| {}), None),
        Err(EventLogError::Closed)
    );
}

// =============================================================================
// SESSION
// =============================================================================

#[test]
fn test_session_register_once() {
    let server = MockServer::new();
    server.pull(registration(0));
    let session = session(&server);

    let subscription = session.register(&request(), Duration::from_secs(1)).unwrap();
    assert_eq!(subscription.handle, HANDLE);
    assert_eq!(subscription.control, CONTROL);
    assert_eq!(session.subscription(), Some(subscription));

    assert!(matches!(
        session.register(&request(), Duration::from_secs(1)),
        Err(EventLogError::InvalidQuery(_))
    ));
    assert_eq!(server.pull_opens(), 1);
}

#[test]
fn test_session_pull_bounds_checked_locally() {
    let server = MockServer::new();
    let session = session(&server);
    let timeout = Duration::from_secs(1);

    for max in [0, 1025] {
        assert!(matches!(
            session.pull(&HANDLE, max, timeout, timeout),
            Err(EventLogError::InvalidConfig(_))
        ));
    }
    assert_eq!(
        session.pull(&HANDLE, 5, timeout, timeout),
        Err(EventLogError::NotConnected)
    );
    assert!(server.log().is_empty());
}

#[test]
fn test_session_wait_timeout_then_ready() {
    let server = MockServer::new();
    server.pull(registration(0));
    server.wait(Reply::Fail(TransportError::Timeout)).wait(ready());
    let session = session(&server);
    let subscription = session.register(&request(), Duration::from_secs(1)).unwrap();

    let timeout = Duration::from_millis(50);
    assert_eq!(session.wait(&subscription.handle, timeout), Ok(WaitStatus::TimedOut));
    assert_eq!(session.wait(&subscription.handle, timeout), Ok(WaitStatus::Ready));
    assert_eq!(session.wait_reconnects(), 1);
    assert_eq!(server.wait_opens().len(), 2);

    let closes = server
        .log()
        .into_iter()
        .filter(|e| *e == Entry::Close(Kind::Wait))
        .count();
    assert_eq!(closes, 1);
}

#[test]
fn test_session_wait_status_is_error() {
    let server = MockServer::new();
    server.pull(registration(0));
    server.wait(Reply::Stub(encode_status(0x0000_04c7)));
    let session = session(&server);
    session.register(&request(), Duration::from_secs(1)).unwrap();

    assert_eq!(
        session.wait(&HANDLE, Duration::from_secs(1)),
        Err(EventLogError::ServerStatus {
            operation: Operation::Wait,
            status: 0x0000_04c7
        })
    );
}

#[test]
fn test_session_closed_rejects_calls() {
    let server = MockServer::new();
    let session = session(&server);
    session.close();
    session.close();

    assert_eq!(
        session.register(&request(), Duration::from_secs(1)),
        Err(EventLogError::Closed)
    );
    assert_eq!(
        session.wait(&HANDLE, Duration::from_secs(1)),
        Err(EventLogError::Closed)
    );
    assert_eq!(server.pull_opens(), 0);
}

#[test]
fn test_session_open_failure_marks_io() {
    let server = MockServer::new();
    server.fail_open_pull(TransportError::ConnectFailed {
        addr: "127.0.0.1:49667".into(),
        reason: "refused".into(),
    });
    let session = session(&server);

    let err = session.register(&request(), Duration::from_secs(1)).unwrap_err();
    assert!(err.is_io());
    assert!(session.io_failed());
}

// =============================================================================
// PROBE
// =============================================================================

fn probe(server: &Arc<MockServer>) -> ConnectionProbe {
    ConnectionProbe::new(Arc::clone(server) as Arc<dyn ChannelFactory>, "Security")
        .with_config(WatcherConfig::for_testing())
}

#[test]
fn test_probe_ok() {
    let server = MockServer::new();
    server.pull(registration(0)).pull(batch(&[1]));
    server.wait(ready());
    script_shutdown(&server);

    assert_eq!(probe(&server).test_connection(RECV), ConnectionStatus::Ok);
    // existing events were requested
    let register = &server.stubs(Kind::Pull, 0)[0];
    let flags = u32::from_le_bytes(register[register.len() - 4..].try_into().unwrap());
    assert_eq!(flags, 0x1000_0002);
}

#[test]
fn test_probe_io_error() {
    let server = MockServer::new();
    server.fail_open_pull(reset());
    assert_eq!(probe(&server).test_connection(RECV), ConnectionStatus::IoError);
}

#[test]
fn test_probe_server_status_is_unknown() {
    let server = MockServer::new();
    server.pull(registration(5));
    assert_eq!(probe(&server).test_connection(RECV), ConnectionStatus::Unknown);
}

#[test]
fn test_probe_times_out() {
    let server = MockServer::new();
    server.pull(registration(0));
    script_shutdown(&server);

    let status = probe(&server).test_connection(Duration::from_millis(100));
    assert_eq!(status, ConnectionStatus::TimedOut);
    assert_eq!(status.to_string(), "ERROR, Timed out");
}

#[test]
fn test_status_display() {
    assert_eq!(ConnectionStatus::Ok.to_string(), "OK");
    assert_eq!(ConnectionStatus::IoError.to_string(), "ERROR, I/O error");
    assert_eq!(ConnectionStatus::TimedOut.to_string(), "ERROR, Timed out");
    assert_eq!(ConnectionStatus::Unknown.to_string(), "ERROR, Unknown error");
}
