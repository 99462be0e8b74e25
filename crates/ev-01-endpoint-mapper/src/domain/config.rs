//! Endpoint mapper configuration.

use std::time::Duration;

use ev_02_rpc_transport::{ConnectionConfig, TransportError};

/// Well-known endpoint mapper port.
pub const EPM_PORT: u16 = 135;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapperConfig {
    pub port: u16,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            port: EPM_PORT,
            connect_timeout: Duration::from_millis(20_000),
            read_timeout: Duration::from_millis(60_000),
        }
    }
}

impl MapperConfig {
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    /// Socket settings for the mapper connection.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::default()
            .with_connect_timeout(self.connect_timeout)
            .with_read_timeout(self.read_timeout)
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        if self.port == 0 {
            return Err(TransportError::InvalidConfig(
                "endpoint mapper port must be non-zero".into(),
            ));
        }
        self.connection_config().validate()
    }

    #[cfg(test)]
    pub fn for_testing(port: u16) -> Self {
        Self::default()
            .with_port(port)
            .with_timeouts(Duration::from_secs(2), Duration::from_secs(2))
    }
}
