//! # Outbound Ports
//!
//! Where the NTLM client gets its identity from.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::domain::errors::NtlmError;

/// Domain, user and password for one handshake.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub domain: String,
    pub user: String,
    pub password: String,
    /// Workstation name sent in AUTHENTICATE; may be empty.
    pub workstation: String,
}

impl Credentials {
    pub fn new(
        domain: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            user: user.into(),
            password: password.into(),
            workstation: String::new(),
        }
    }

    #[must_use]
    pub fn with_workstation(mut self, workstation: impl Into<String>) -> Self {
        self.workstation = workstation.into();
        self
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("domain", &self.domain)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("workstation", &self.workstation)
            .finish()
    }
}

/// Supplies credentials when a challenge has to be answered.
///
/// Only the AUTHENTICATE computation reads them.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self) -> Result<Credentials, NtlmError>;
}
