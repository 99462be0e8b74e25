//! `ev-watch`: subscribes to a remote event log and logs every batch.
//!
//! Exits non-zero when the subscription fails.

use clap::Parser;

fn main() -> anyhow::Result<()> {
    ev_runtime::run(ev_runtime::Cli::parse())
}
