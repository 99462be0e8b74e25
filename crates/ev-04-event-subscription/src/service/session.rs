//! # Subscription Session
//!
//! Owns the two connections of one subscription.
//!
//! - **Pull connection**: register, pull, cancel, close. Shared between the
//!   watcher thread and whoever calls `close()`, so every exchange runs under
//!   its mutex from request write to last response byte.
//! - **Wait connection**: the long-poll only. Joins the pull connection's
//!   association group with its own handshake. A local read timeout discards
//!   it; the next wait opens a fresh one. The subscription handle stays valid.
//!
//! Lock order is wait, then pull. `close()` holds the pull lock and only
//! try-locks the wait slot; a blocked wait is unblocked through its abort
//! handle instead.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ev_02_rpc_transport::AssociationGroup;
use parking_lot::Mutex;
use shared_types::ContextHandle;

use crate::domain::errors::EventLogError;
use crate::domain::messages::{
    decode_close, decode_status, encode_handle, encode_next, encode_register, BatchResponse,
    Operation, Registration, MAX_RECORD_COUNT,
};
use crate::domain::query::SubscriptionRequest;
use crate::domain::record::EventBatch;
use crate::ports::inbound::{Subscription, SubscriptionApi, WaitStatus};
use crate::ports::outbound::{Abort, ChannelFactory, RpcChannel};

#[derive(Default)]
struct PullState {
    channel: Option<Box<dyn RpcChannel>>,
    port: Option<u16>,
    group: Option<AssociationGroup>,
    subscription: Option<Subscription>,
}

pub struct SubscriptionSession {
    factory: Arc<dyn ChannelFactory>,
    pull: Mutex<PullState>,
    wait: Mutex<Option<Box<dyn RpcChannel>>>,
    wait_abort: Mutex<Option<Box<dyn Abort>>>,
    io_failed: AtomicBool,
    closed: AtomicBool,
    wait_reconnects: AtomicU64,
}

impl SubscriptionSession {
    pub fn new(factory: Arc<dyn ChannelFactory>) -> Self {
        Self {
            factory,
            pull: Mutex::new(PullState::default()),
            wait: Mutex::new(None),
            wait_abort: Mutex::new(None),
            io_failed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            wait_reconnects: AtomicU64::new(0),
        }
    }

    /// Handles of the registered subscription, if any.
    pub fn subscription(&self) -> Option<Subscription> {
        self.pull.lock().subscription
    }

    /// Whether a network failure has been seen on the pull connection.
    pub fn io_failed(&self) -> bool {
        self.io_failed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait connections discarded after a local read timeout.
    pub fn wait_reconnects(&self) -> u64 {
        self.wait_reconnects.load(Ordering::SeqCst)
    }

    /// Releases both connections. Later calls fail with `Closed`.
    ///
    /// Sends nothing to the server; cancel and close the handles first.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(abort) = self.wait_abort.lock().take() {
            abort.abort();
        }
        if let Some(mut slot) = self.wait.try_lock() {
            if let Some(mut channel) = slot.take() {
                channel.close();
            }
        }
        if let Some(mut channel) = self.pull.lock().channel.take() {
            channel.close();
        }
        tracing::info!("subscription session closed");
    }

    fn ensure_open(&self) -> Result<(), EventLogError> {
        if self.is_closed() {
            return Err(EventLogError::Closed);
        }
        Ok(())
    }

    /// One request/response on the pull connection. The caller holds the lock.
    fn exchange(
        &self,
        state: &mut PullState,
        op: Operation,
        stub: &[u8],
        read_timeout: Duration,
    ) -> Result<Vec<u8>, EventLogError> {
        let channel = state.channel.as_mut().ok_or(EventLogError::NotConnected)?;
        match channel.call(op.opnum(), stub, read_timeout) {
            Ok(response) => Ok(response),
            Err(e) => {
                if e.is_io() {
                    self.io_failed.store(true, Ordering::SeqCst);
                }
                if e.aborts_connection() {
                    channel.close();
                    state.channel = None;
                }
                tracing::debug!(operation = %op, error = %e, "pull exchange failed");
                Err(e.into())
            }
        }
    }

    fn discard_wait(&self, slot: &mut Option<Box<dyn RpcChannel>>) {
        if let Some(mut channel) = slot.take() {
            channel.close();
        }
        *self.wait_abort.lock() = None;
    }
}

impl SubscriptionApi for SubscriptionSession {
    fn register(
        &self,
        request: &SubscriptionRequest,
        read_timeout: Duration,
    ) -> Result<Subscription, EventLogError> {
        request.validate()?;
        self.ensure_open()?;

        let mut state = self.pull.lock();
        // close() may have run between the check above and the lock
        self.ensure_open()?;
        if state.subscription.is_some() {
            return Err(EventLogError::InvalidQuery(
                "session already holds a subscription".into(),
            ));
        }
        if state.channel.is_none() {
            let mut channel = self.factory.open_pull().map_err(|e| {
                if e.is_io() {
                    self.io_failed.store(true, Ordering::SeqCst);
                }
                EventLogError::from(e)
            })?;
            if self.is_closed() {
                channel.close();
                return Err(EventLogError::Closed);
            }
            state.port = channel.port();
            state.group = channel.association_group();
            state.channel = Some(channel);
            tracing::info!(port = ?state.port, group = ?state.group, "pull connection established");
        }

        let stub = encode_register(
            &request.query.path,
            &request.query.filter,
            request.bookmark(),
            request.flags(),
        );
        let response = self.exchange(&mut state, Operation::Register, &stub, read_timeout)?;
        let registration = Registration::decode(&response)?;
        if registration.status != 0 {
            return Err(EventLogError::ServerStatus {
                operation: Operation::Register,
                status: registration.status,
            });
        }
        for channel in registration.channels.iter().filter(|c| c.status != 0) {
            tracing::warn!(channel = %channel.name, status = channel.status, "channel reported an error");
        }

        let subscription = Subscription {
            handle: registration.handle,
            control: registration.control,
        };
        state.subscription = Some(subscription);
        tracing::info!(
            path = %request.query.path,
            flags = request.flags(),
            "subscription registered"
        );
        Ok(subscription)
    }

    fn wait(
        &self,
        handle: &ContextHandle,
        read_timeout: Duration,
    ) -> Result<WaitStatus, EventLogError> {
        self.ensure_open()?;
        let mut slot = self.wait.lock();

        if slot.is_none() {
            let (port, group) = {
                let state = self.pull.lock();
                (state.port, state.group)
            };
            let channel = self.factory.open_wait(port, group)?;
            *self.wait_abort.lock() = channel.abort_handle();
            *slot = Some(channel);
            if self.is_closed() {
                self.discard_wait(&mut slot);
                return Err(EventLogError::Closed);
            }
            tracing::info!(port = ?port, group = ?group, "wait connection established");
        }

        let stub = encode_handle(handle);
        let result = match slot.as_mut() {
            Some(channel) => channel.call(Operation::Wait.opnum(), &stub, read_timeout),
            None => return Err(EventLogError::NotConnected),
        };

        match result {
            Ok(response) => {
                let status = decode_status(Operation::Wait, &response)?;
                if status != 0 {
                    return Err(EventLogError::ServerStatus {
                        operation: Operation::Wait,
                        status,
                    });
                }
                Ok(WaitStatus::Ready)
            }
            Err(e) if e.is_timeout() => {
                self.discard_wait(&mut slot);
                let reconnects = self.wait_reconnects.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(reconnects, "no events within the wait timeout, reconnecting");
                Ok(WaitStatus::TimedOut)
            }
            Err(e) => {
                self.discard_wait(&mut slot);
                Err(e.into())
            }
        }
    }

    fn pull(
        &self,
        handle: &ContextHandle,
        max_records: u32,
        timeout: Duration,
        read_timeout: Duration,
    ) -> Result<EventBatch, EventLogError> {
        if max_records == 0 || max_records > MAX_RECORD_COUNT {
            return Err(EventLogError::InvalidConfig(format!(
                "max_records must be within 1..={}, got {}",
                MAX_RECORD_COUNT, max_records
            )));
        }
        self.ensure_open()?;

        let stub = encode_next(handle, max_records, timeout);
        let response = {
            let mut state = self.pull.lock();
            self.exchange(&mut state, Operation::Next, &stub, read_timeout)?
        };

        let response = BatchResponse::decode(Operation::Next, &response, max_records)?;
        if response.status != 0 {
            return Err(EventLogError::ServerStatus {
                operation: Operation::Next,
                status: response.status,
            });
        }
        EventBatch::from_response(response)
    }

    fn cancel(&self, control: &ContextHandle, read_timeout: Duration) -> Result<u32, EventLogError> {
        self.ensure_open()?;
        let mut state = self.pull.lock();
        let response =
            self.exchange(&mut state, Operation::Cancel, &encode_handle(control), read_timeout)?;
        decode_status(Operation::Cancel, &response)
    }

    fn close_handle(
        &self,
        handle: &ContextHandle,
        read_timeout: Duration,
    ) -> Result<u32, EventLogError> {
        self.ensure_open()?;
        let mut state = self.pull.lock();
        let response =
            self.exchange(&mut state, Operation::Close, &encode_handle(handle), read_timeout)?;
        decode_close(&response)
    }
}

impl Drop for SubscriptionSession {
    fn drop(&mut self) {
        self.close();
    }
}
