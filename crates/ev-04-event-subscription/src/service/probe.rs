//! Connection test: subscribe to a channel and wait for the first outcome.

use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::config::WatcherConfig;
use crate::domain::errors::EventLogError;
use crate::domain::query::{EventLogQuery, SubscriptionRequest};
use crate::domain::record::EventBatch;
use crate::ports::outbound::ChannelFactory;
use crate::service::session::SubscriptionSession;
use crate::service::watcher::SubscriptionWatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// A batch arrived.
    Ok,
    /// The watcher failed on network I/O.
    IoError,
    /// Nothing arrived within the test timeout.
    TimedOut,
    /// Any other failure.
    Unknown,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Ok => write!(f, "OK"),
            ConnectionStatus::IoError => write!(f, "ERROR, I/O error"),
            ConnectionStatus::TimedOut => write!(f, "ERROR, Timed out"),
            ConnectionStatus::Unknown => write!(f, "ERROR, Unknown error"),
        }
    }
}

pub struct ConnectionProbe {
    factory: Arc<dyn ChannelFactory>,
    path: String,
    config: WatcherConfig,
}

impl ConnectionProbe {
    pub fn new(factory: Arc<dyn ChannelFactory>, path: impl Into<String>) -> Self {
        Self {
            factory,
            path: path.into(),
            config: WatcherConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: WatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Reads existing events on a fresh session and reports the first result.
    /// Succeeds as soon as one batch arrives.
    pub fn test_connection(&self, timeout: Duration) -> ConnectionStatus {
        let session = Arc::new(SubscriptionSession::new(Arc::clone(&self.factory)));
        let request =
            SubscriptionRequest::new(EventLogQuery::new(self.path.clone(), "*")).read_existing_events(true);
        let watcher = SubscriptionWatcher::new(session, request).with_config(self.config.clone());

        let (tx, rx) = mpsc::channel();
        let started = watcher.start(
            Box::new(move |result: Result<EventBatch, EventLogError>| {
                let _ = tx.send(result);
            }),
            None,
        );

        let status = match started {
            Err(e) => {
                tracing::warn!(error = %e, "connection test could not start");
                ConnectionStatus::Unknown
            }
            Ok(()) => match rx.recv_timeout(timeout) {
                Ok(Ok(_)) => ConnectionStatus::Ok,
                Ok(Err(e)) if e.is_io() => ConnectionStatus::IoError,
                Ok(Err(_)) => ConnectionStatus::Unknown,
                Err(mpsc::RecvTimeoutError::Timeout) => ConnectionStatus::TimedOut,
                Err(mpsc::RecvTimeoutError::Disconnected) => ConnectionStatus::Unknown,
            },
        };
        watcher.close();
        tracing::info!(path = %self.path, %status, "connection test finished");
        status
    }
}
