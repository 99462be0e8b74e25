//! # Binding
//!
//! Destination of a connection and the session correlation token.

use shared_types::SyntaxId;

/// Where a connection goes and what it negotiated.
///
/// Fields are only changed by the owning connection before it is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    host: String,
    interface: SyntaxId,
    port: Option<u16>,
    max_recv_frag: u16,
}

impl Binding {
    pub fn new(host: impl Into<String>, interface: SyntaxId) -> Self {
        Self {
            host: host.into(),
            interface,
            port: None,
            max_recv_frag: 0,
        }
    }

    /// Binding with an already known port; no endpoint lookup happens.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn interface(&self) -> &SyntaxId {
        &self.interface
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Largest fragment the server will send, as negotiated at bind.
    ///
    /// Zero until bound.
    pub fn max_recv_frag(&self) -> u16 {
        self.max_recv_frag
    }

    pub(crate) fn set_port(&mut self, port: u16) {
        self.port = Some(port);
    }

    pub(crate) fn set_max_recv_frag(&mut self, max: u16) {
        self.max_recv_frag = max;
    }
}

impl std::fmt::Display for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.port {
            Some(port) => write!(f, "ncacn_ip_tcp:{}[{}]", self.host, port),
            None => write!(f, "ncacn_ip_tcp:{}", self.host),
        }
    }
}

/// Association group id returned in a bind-ack.
///
/// Passing it to a second connection's bind makes the server treat both
/// connections as one client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssociationGroup(pub u32);

/// Protection applied to request/response PDUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthLevel {
    /// Signature only.
    Integrity = 5,
    /// Signature plus body encryption.
    Privacy = 6,
}

impl AuthLevel {
    pub fn is_privacy(self) -> bool {
        self == AuthLevel::Privacy
    }
}
