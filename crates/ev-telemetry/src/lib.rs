//! # EventWire Telemetry
//!
//! Structured logging setup for binaries. Libraries only emit `tracing`
//! events; installing the subscriber is left to whoever owns `main`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ev_telemetry::{init_logging, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&TelemetryConfig::from_env())?;
//!     // ...
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `EV_LOG_LEVEL` | `RUST_LOG`, then `info` | Log filter directives |
//! | `EV_JSON_LOGS` | `false` | One JSON object per line |
//! | `EV_SERVICE_NAME` | `eventwire` | Service name on the startup line |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::init_logging;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("A global tracing subscriber is already installed: {0}")]
    AlreadyInitialized(String),

    #[error("Invalid log filter: {0}")]
    Config(String),
}
