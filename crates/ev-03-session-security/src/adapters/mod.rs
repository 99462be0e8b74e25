//! Credential adapters.

mod credentials;

pub use credentials::StaticCredentials;
