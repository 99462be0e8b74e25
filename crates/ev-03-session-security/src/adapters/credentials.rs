//! Fixed credentials held in memory.

use crate::domain::errors::NtlmError;
use crate::ports::outbound::{CredentialProvider, Credentials};

#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl CredentialProvider for StaticCredentials {
    fn credentials(&self) -> Result<Credentials, NtlmError> {
        if self.credentials.user.is_empty() {
            return Err(NtlmError::Credentials("user name is empty".into()));
        }
        Ok(self.credentials.clone())
    }
}
