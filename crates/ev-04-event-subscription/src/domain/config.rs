//! # Subscription Configuration
//!
//! Two timeouts are in play for every call:
//!
//! - the **protocol timeout** travels in the request and bounds how long the
//!   server holds the call;
//! - the **local read timeout** bounds how long a blocking receive waits.
//!
//! The local one must be the larger, or reads give up before the server
//! answers and force needless reconnects.

use std::time::Duration;

use ev_01_endpoint_mapper::MapperConfig;
use ev_02_rpc_transport::{AuthLevel, ConnectionConfig};
use ev_03_session_security::Credentials;

use crate::domain::errors::EventLogError;
use crate::domain::messages::MAX_RECORD_COUNT;

pub const DEFAULT_REQUESTED_RECORDS: u32 = 5;
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_millis(15_000);
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(120_000);
pub const DEFAULT_PULL_READ_MARGIN: Duration = Duration::from_millis(1_000);

/// Wait/pull loop tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Records asked for per pull (1..=1024).
    pub requested_records: u32,
    /// Protocol timeout sent with each pull; also the read timeout for
    /// cancel and close during shutdown.
    pub pull_timeout: Duration,
    /// Local read timeout of the long-poll wait. Expiry rebuilds the wait
    /// connection.
    pub wait_timeout: Duration,
    /// Added to `pull_timeout` to get the local read timeout of a pull.
    pub pull_read_margin: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            requested_records: DEFAULT_REQUESTED_RECORDS,
            pull_timeout: DEFAULT_PULL_TIMEOUT,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            pull_read_margin: DEFAULT_PULL_READ_MARGIN,
        }
    }
}

impl WatcherConfig {
    #[must_use]
    pub fn with_requested_records(mut self, records: u32) -> Self {
        self.requested_records = records;
        self
    }

    #[must_use]
    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Local read timeout for a pull.
    pub fn pull_read_timeout(&self) -> Duration {
        self.pull_timeout + self.pull_read_margin
    }

    pub fn validate(&self) -> Result<(), EventLogError> {
        if self.requested_records == 0 || self.requested_records > MAX_RECORD_COUNT {
            return Err(EventLogError::InvalidConfig(format!(
                "requested_records must be within 1..={}, got {}",
                MAX_RECORD_COUNT, self.requested_records
            )));
        }
        if self.pull_timeout.is_zero() || self.wait_timeout.is_zero() {
            return Err(EventLogError::InvalidConfig(
                "pull and wait timeouts must be non-zero".into(),
            ));
        }
        if self.pull_read_timeout() <= self.pull_timeout {
            return Err(EventLogError::InvalidConfig(
                "pull read timeout must exceed the pull protocol timeout".into(),
            ));
        }
        Ok(())
    }

    /// Short timeouts for scripted tests.
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            requested_records: 5,
            pull_timeout: Duration::from_millis(200),
            wait_timeout: Duration::from_millis(200),
            pull_read_margin: Duration::from_millis(100),
        }
    }
}

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    /// Known even6 port. Resolved through the endpoint mapper when absent.
    pub port: Option<u16>,
    pub credentials: Credentials,
    /// Defaults to privacy (signed and sealed).
    pub auth_level: AuthLevel,
    /// Connect timeout and bind-time read timeout of both connections.
    pub connection: ConnectionConfig,
    pub mapper: MapperConfig,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            port: None,
            credentials,
            auth_level: AuthLevel::Privacy,
            connection: ConnectionConfig::default(),
            mapper: MapperConfig::default(),
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn with_auth_level(mut self, level: AuthLevel) -> Self {
        self.auth_level = level;
        self
    }

    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    #[must_use]
    pub fn with_mapper(mut self, mapper: MapperConfig) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn validate(&self) -> Result<(), EventLogError> {
        if self.host.is_empty() {
            return Err(EventLogError::InvalidConfig("host is empty".into()));
        }
        if self.credentials.user.is_empty() {
            return Err(EventLogError::InvalidConfig("user is empty".into()));
        }
        if self.port == Some(0) {
            return Err(EventLogError::InvalidConfig("port must be non-zero".into()));
        }
        self.connection.validate()?;
        if self.port.is_none() {
            self.mapper.validate()?;
        }
        Ok(())
    }
}
