//! Watcher progress as reported to the progress callback.

use chrono::{DateTime, Utc};

use crate::domain::errors::EventLogError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLogProgress {
    /// Set once, when the watcher stops on a fatal error.
    pub connection_error: Option<EventLogError>,
    /// Id of the most recently delivered record.
    pub last_record_id: Option<u64>,
    /// Creation time of the most recently delivered record, when a decoder
    /// supplied one.
    pub last_event_created: Option<DateTime<Utc>>,
    /// Start of the most recent wait.
    pub last_wait_time: Option<DateTime<Utc>>,
    /// Start of the most recent pull.
    pub last_pull_time: Option<DateTime<Utc>>,
    /// Wait connections discarded after a local read timeout.
    pub wait_reconnects: u64,
}

impl std::fmt::Display for EventLogProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let time = |t: &Option<DateTime<Utc>>| t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".into());
        write!(
            f,
            "(error={}, last_record_id={}, last_wait={}, last_pull={}, last_created={}, wait_reconnects={})",
            self.connection_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "-".into()),
            self.last_record_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".into()),
            time(&self.last_wait_time),
            time(&self.last_pull_time),
            time(&self.last_event_created),
            self.wait_reconnects,
        )
    }
}
