//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "ev-watch")]
#[command(about = "Subscribe to a remote Windows event log and log every batch", long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Start at the oldest retained event instead of new events only
    #[arg(long)]
    pub read_existing: bool,

    /// Resume after the event named by this bookmark XML
    #[arg(long)]
    pub bookmark: Option<String>,

    /// Stop after this many batches
    #[arg(long)]
    pub max_batches: Option<u64>,

    /// Run a connection test, report its status and exit
    #[arg(long)]
    pub test_connection: bool,

    /// Connection test timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    pub test_timeout_ms: u64,
}
