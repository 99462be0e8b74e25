//! Runs one subscription until it fails or the batch limit is reached.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ev_04_event_subscription::{
    lookup_event_log_port, ConnectionProbe, ConnectionStatus, EventBatch, EventLogError,
    EventLogProgress, SessionConfig, SubscriptionSession, SubscriptionWatcher, TcpChannelFactory,
};
use ev_telemetry::{init_logging, TelemetryConfig};
use tracing::{debug, info};

use crate::cli::Cli;
use crate::config::FileConfig;

pub fn run(cli: Cli) -> Result<()> {
    init_logging(&TelemetryConfig::from_env()).context("Failed to initialise logging")?;

    let file = FileConfig::load(&cli.config)?;
    let password = file.password(|name| std::env::var(name).ok())?;
    let session_config = resolve_port(file.session_config(password)?)?;
    let watcher_config = file.watcher_config()?;
    let request = file.subscription_request(cli.read_existing, cli.bookmark.clone())?;
    let factory = Arc::new(TcpChannelFactory::new(session_config));

    if cli.test_connection {
        let status = ConnectionProbe::new(factory, request.query.path.clone())
            .with_config(watcher_config)
            .test_connection(Duration::from_millis(cli.test_timeout_ms));
        info!(%status, "connection test");
        if status != ConnectionStatus::Ok {
            bail!("Connection test failed: {}", status);
        }
        return Ok(());
    }

    info!(
        path = %request.query.path,
        filter = %request.query.filter,
        start = ?request.start,
        "starting event log watcher"
    );
    let session = Arc::new(SubscriptionSession::new(factory));
    let watcher = SubscriptionWatcher::new(session, request).with_config(watcher_config);

    let (tx, rx) = mpsc::channel();
    watcher
        .start(
            Box::new(move |result: Result<EventBatch, EventLogError>| {
                let _ = tx.send(result);
            }),
            Some(Box::new(|progress: &EventLogProgress| {
                debug!(%progress, "watcher progress");
            })),
        )
        .context("Failed to start the watcher")?;

    let result = consume(&rx, cli.max_batches);
    watcher.close();
    let total = result?;
    info!(total, "watcher stopped");
    Ok(())
}

/// Fills in the event log port when the configuration leaves it out, so both
/// connections of the session reuse one lookup.
fn resolve_port(config: SessionConfig) -> Result<SessionConfig> {
    if config.port.is_some() {
        return Ok(config);
    }
    let port = lookup_event_log_port(&config.host, &config.mapper)
        .with_context(|| format!("Could not resolve the event log port on {}", config.host))?;
    info!(host = %config.host, port, "resolved event log port");
    Ok(config.with_port(port))
}

/// Logs batches until the watcher reports an error, stops, or `max_batches`
/// batches have arrived. Returns the number of records seen.
pub fn consume(
    rx: &Receiver<Result<EventBatch, EventLogError>>,
    max_batches: Option<u64>,
) -> Result<u64> {
    let mut batches = 0u64;
    let mut records = 0u64;
    for result in rx.iter() {
        let batch = result.context("Event log subscription failed")?;
        batches += 1;
        records += batch.len() as u64;

        let ids: Vec<u64> = batch.records().iter().map(|r| r.record_id).collect();
        info!(count = batch.len(), record_ids = ?ids, "received events");

        if max_batches.is_some_and(|max| batches >= max) {
            break;
        }
    }
    Ok(records)
}
