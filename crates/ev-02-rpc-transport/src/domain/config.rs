//! Connection configuration.

use std::time::Duration;

use crate::domain::errors::TransportError;
use crate::domain::pdu::HEADER_LEN;

/// Socket and negotiation parameters for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Budget for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Budget for each blocking read.
    pub read_timeout: Duration,
    /// Largest fragment we send, before negotiation.
    pub max_xmit_frag: u16,
    /// Largest fragment we accept, before negotiation.
    pub max_recv_frag: u16,
    /// Disable Nagle on the socket.
    pub nodelay: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(20_000),
            read_timeout: Duration::from_millis(60_000),
            max_xmit_frag: 5840,
            max_recv_frag: 5840,
            nodelay: true,
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_frag(mut self, max: u16) -> Self {
        self.max_xmit_frag = max;
        self.max_recv_frag = max;
        self
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        if self.connect_timeout.is_zero() {
            return Err(TransportError::InvalidConfig(
                "connect_timeout must be non-zero".into(),
            ));
        }
        // room for a header, a trailer and a signature
        let floor = (HEADER_LEN + 32) as u16;
        if self.max_xmit_frag < floor || self.max_recv_frag < floor {
            return Err(TransportError::InvalidConfig(format!(
                "fragment sizes must be at least {} bytes",
                floor
            )));
        }
        Ok(())
    }

    /// Small limits and short timeouts for loopback tests.
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(2),
            max_xmit_frag: 1024,
            max_recv_frag: 1024,
            nodelay: true,
        }
    }
}
