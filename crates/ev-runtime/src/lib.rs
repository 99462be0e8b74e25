//! # EventWire Runtime
//!
//! Wiring for the `ev-watch` binary.
//!
//! ## Startup Sequence
//!
//! 1. Initialise logging from the environment
//! 2. Load the TOML configuration and resolve the password
//! 3. Resolve the event log port through the endpoint mapper if none is set
//! 4. Start a watcher and log batches until it fails or the batch limit is hit
//! 5. Close the watcher (cancel, close handles, release connections)

pub mod cli;
pub mod config;
pub mod runner;

pub use cli::Cli;
pub use config::FileConfig;
pub use runner::{consume, run};
