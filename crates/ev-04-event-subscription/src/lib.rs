//! # Event Subscription (EV-04)
//!
//! Pull subscriptions to a remote Windows event log over even6.
//!
//! ## Architecture
//!
//! This crate follows hexagonal architecture:
//! - **Domain Layer** (`domain/`): request stubs, response decoding, event
//!   record layout, query and watcher configuration.
//! - **Ports Layer** (`ports/`): `SubscriptionApi` inbound; `ChannelFactory`,
//!   `RpcChannel` and `EventDecoder` outbound.
//! - **Service Layer** (`service/`): `SubscriptionSession` (two connections,
//!   one subscription), `SubscriptionWatcher` (background wait/pull loop) and
//!   `ConnectionProbe`.
//! - **Adapters Layer** (`adapters/`): NTLM-secured TCP channels and the
//!   endpoint mapper lookup.
//!
//! ## Connections
//!
//! | Connection | Carries | On local read timeout |
//! |------------|---------|-----------------------|
//! | pull | register, next, cancel, close | fatal |
//! | wait | wait only | discarded and reopened |
//!
//! ## Usage
//!
//! ```ignore
//! let factory = Arc::new(TcpChannelFactory::new(SessionConfig::new("dc01", creds)));
//! let session = Arc::new(SubscriptionSession::new(factory));
//! let request = SubscriptionRequest::new(EventLogQuery::new("Security", "*"));
//! let watcher = SubscriptionWatcher::new(session, request);
//! watcher.start(Box::new(|batch| println!("{:?}", batch.map(|b| b.len()))), None)?;
//! ```

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::{lookup_event_log_port, TcpChannelFactory};
pub use domain::{
    EventBatch, EventLogError, EventLogProgress, EventLogQuery, EventRecord, Operation,
    SessionConfig, StartPosition, SubscriptionRequest, WatcherConfig,
};
pub use ports::{
    Abort, ChannelFactory, EventDecoder, RpcChannel, StructuredEvent, Subscription,
    SubscriptionApi, WaitStatus,
};
pub use service::{
    ConnectionProbe, ConnectionStatus, EventCallback, ProgressCallback, SubscriptionSession,
    SubscriptionWatcher,
};
