//! # Subscription Watcher
//!
//! Background worker that turns a `SubscriptionSession` into a stream of
//! batches:
//!
//! ```text
//! register ──► wait ──► pull ──► pull ... (until a short batch) ──┐
//!               ▲  │ timed out: new wait connection               │
//!               └──┴──────────────────────────────────────────────┘
//! ```
//!
//! Every batch and the first fatal error go to the events callback, in
//! order, from the worker thread. Progress snapshots go to the optional
//! progress callback; a panic there is logged and ignored.
//!
//! `close()` cancels and closes the server handles (skipped after an I/O
//! failure), releases both connections and joins the worker.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::Utc;
use ev_02_rpc_transport::TransportError;
use parking_lot::Mutex;

use crate::domain::config::WatcherConfig;
use crate::domain::errors::EventLogError;
use crate::domain::progress::EventLogProgress;
use crate::domain::query::SubscriptionRequest;
use crate::domain::record::EventBatch;
use crate::ports::inbound::{Subscription, SubscriptionApi, WaitStatus};
use crate::ports::outbound::EventDecoder;
use crate::service::session::SubscriptionSession;

/// Receives each batch in server order, then at most one fatal error.
pub type EventCallback = Box<dyn FnMut(Result<EventBatch, EventLogError>) + Send>;

/// Receives a progress snapshot after every state change.
pub type ProgressCallback = Box<dyn FnMut(&EventLogProgress) + Send>;

static WATCHER_SEQ: AtomicUsize = AtomicUsize::new(0);

pub struct SubscriptionWatcher {
    session: Arc<SubscriptionSession>,
    request: SubscriptionRequest,
    config: WatcherConfig,
    decoder: Option<Arc<dyn EventDecoder>>,
    closed: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionWatcher {
    pub fn new(session: Arc<SubscriptionSession>, request: SubscriptionRequest) -> Self {
        Self {
            session,
            request,
            config: WatcherConfig::default(),
            decoder: None,
            closed: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: WatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Decoder used to read record ids and creation times for progress.
    #[must_use]
    pub fn with_decoder(mut self, decoder: Arc<dyn EventDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn session(&self) -> &Arc<SubscriptionSession> {
        &self.session
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Starts the worker thread. Fails on invalid configuration or request,
    /// or if the watcher was already started or closed.
    pub fn start(
        &self,
        on_events: EventCallback,
        on_progress: Option<ProgressCallback>,
    ) -> Result<(), EventLogError> {
        self.config.validate()?;
        self.request.validate()?;
        if self.is_closed() {
            return Err(EventLogError::Closed);
        }

        let mut slot = self.thread.lock();
        if slot.is_some() {
            return Err(EventLogError::InvalidConfig("watcher already started".into()));
        }

        let worker = Worker {
            session: Arc::clone(&self.session),
            request: self.request.clone(),
            config: self.config.clone(),
            decoder: self.decoder.clone(),
            closed: Arc::clone(&self.closed),
            on_events,
            on_progress,
            progress: EventLogProgress::default(),
        };
        let name = format!(
            "event-log-watcher-{}",
            WATCHER_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run())
            .map_err(|e| EventLogError::from(TransportError::from(e)))?;
        *slot = Some(handle);

        tracing::info!(
            thread = %name,
            path = %self.request.query.path,
            requested = self.config.requested_records,
            "event log watcher started"
        );
        Ok(())
    }

    /// Stops the watcher. Idempotent.
    ///
    /// Joins the worker thread. A wait connection still being opened has no
    /// abort handle yet, so `close()` can block until that connect and bind
    /// finish, up to the connect timeout plus the read timeout.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.session.io_failed() {
            tracing::info!("skipping server-side cleanup after an I/O failure");
        } else if let Some(subscription) = self.session.subscription() {
            self.release_handles(&subscription);
        }
        self.session.close();

        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("event log watcher thread panicked");
            }
        }
        tracing::info!("event log watcher closed");
    }

    /// Cancel, then close the subscription handle, then the control handle.
    fn release_handles(&self, subscription: &Subscription) {
        let timeout = self.config.pull_timeout;
        if let Err(e) = self.session.cancel(&subscription.control, timeout) {
            tracing::warn!(error = %e, "cancel failed during shutdown");
        }
        for handle in [&subscription.handle, &subscription.control] {
            match self.session.close_handle(handle, timeout) {
                Ok(0) => {}
                Ok(status) => tracing::warn!(status, "close returned a non-zero status"),
                Err(e) => tracing::warn!(error = %e, "close failed during shutdown"),
            }
        }
    }
}

impl Drop for SubscriptionWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// WORKER
// =============================================================================

struct Worker {
    session: Arc<SubscriptionSession>,
    request: SubscriptionRequest,
    config: WatcherConfig,
    decoder: Option<Arc<dyn EventDecoder>>,
    closed: Arc<AtomicBool>,
    on_events: EventCallback,
    on_progress: Option<ProgressCallback>,
    progress: EventLogProgress,
}

impl Worker {
    fn run(mut self) {
        if let Err(e) = self.drive() {
            if self.is_closed() {
                tracing::debug!(error = %e, "watcher stopped during close");
                return;
            }
            tracing::error!(error = %e, io = e.is_io(), "event log watcher failed");
            (self.on_events)(Err(e.clone()));
            self.progress.connection_error = Some(e);
            self.report_progress();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn drive(&mut self) -> Result<(), EventLogError> {
        let subscription = self
            .session
            .register(&self.request, self.config.pull_read_timeout())?;

        while !self.is_closed() {
            self.progress.last_wait_time = Some(Utc::now());
            self.report_progress();

            match self.session.wait(&subscription.handle, self.config.wait_timeout)? {
                WaitStatus::TimedOut => {
                    self.progress.wait_reconnects = self.session.wait_reconnects();
                }
                WaitStatus::Ready => self.pull_events(&subscription)?,
            }
        }
        Ok(())
    }

    /// Pulls until the server returns fewer records than requested.
    fn pull_events(&mut self, subscription: &Subscription) -> Result<(), EventLogError> {
        let requested = self.config.requested_records;
        loop {
            if self.is_closed() {
                return Ok(());
            }
            self.progress.last_pull_time = Some(Utc::now());
            let batch = self.session.pull(
                &subscription.handle,
                requested,
                self.config.pull_timeout,
                self.config.pull_read_timeout(),
            )?;
            let received = batch.len();
            tracing::debug!(received, requested, "pulled events");

            if !batch.is_empty() {
                self.note_last_record(&batch);
                (self.on_events)(Ok(batch));
                self.report_progress();
            }
            if received < requested as usize {
                return Ok(());
            }
        }
    }

    fn note_last_record(&mut self, batch: &EventBatch) {
        let Some(last) = batch.last() else {
            return;
        };
        self.progress.last_record_id = Some(last.record_id);

        if let Some(decoder) = &self.decoder {
            let range = last.bin_xml_range();
            match decoder.decode(batch.buffer(), range.start, range.len()) {
                Ok(event) => {
                    self.progress.last_record_id = Some(event.record_id);
                    self.progress.last_event_created = event.time_created;
                }
                Err(e) => tracing::warn!(error = %e, "could not decode last event of batch"),
            }
        }
    }

    fn report_progress(&mut self) {
        let Some(callback) = self.on_progress.as_mut() else {
            return;
        };
        let progress = &self.progress;
        if catch_unwind(AssertUnwindSafe(|| callback(progress))).is_err() {
            tracing::warn!("progress callback panicked");
        }
    }
}
