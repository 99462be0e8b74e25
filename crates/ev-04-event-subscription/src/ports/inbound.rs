//! # Inbound Port - SubscriptionApi
//!
//! The caller-facing subscription operations.
//!
//! | Method | Connection | Fatal on non-zero status |
//! |--------|------------|--------------------------|
//! | `register` | pull (opened on first use) | yes |
//! | `wait` | wait (opened on demand) | yes |
//! | `pull` | pull | yes |
//! | `cancel` | pull | caller decides |
//! | `close_handle` | pull | caller decides |

use std::time::Duration;

use shared_types::ContextHandle;

use crate::domain::errors::EventLogError;
use crate::domain::query::SubscriptionRequest;
use crate::domain::record::EventBatch;

/// Handles of a registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    /// Names the subscription in wait, pull and close.
    pub handle: ContextHandle,
    /// Names the cancellable control channel.
    pub control: ContextHandle,
}

/// Outcome of one wait attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The server reported new events.
    Ready,
    /// The local read timeout expired; the wait connection was discarded and
    /// the next wait opens a new one.
    TimedOut,
}

pub trait SubscriptionApi: Send + Sync {
    /// Registers a pull subscription. The request is validated before any
    /// network call.
    fn register(
        &self,
        request: &SubscriptionRequest,
        read_timeout: Duration,
    ) -> Result<Subscription, EventLogError>;

    /// Long-polls until the server has events for `handle`.
    fn wait(&self, handle: &ContextHandle, read_timeout: Duration)
        -> Result<WaitStatus, EventLogError>;

    /// Fetches up to `max_records` records.
    fn pull(
        &self,
        handle: &ContextHandle,
        max_records: u32,
        timeout: Duration,
        read_timeout: Duration,
    ) -> Result<EventBatch, EventLogError>;

    /// Cancels a pending wait or pull on the server. Returns the server status.
    fn cancel(&self, control: &ContextHandle, read_timeout: Duration) -> Result<u32, EventLogError>;

    /// Releases a server handle. Returns the server status.
    fn close_handle(
        &self,
        handle: &ContextHandle,
        read_timeout: Duration,
    ) -> Result<u32, EventLogError>;
}
