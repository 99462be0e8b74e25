//! Subscription target and start position.

use crate::domain::errors::EventLogError;
use crate::domain::messages::{
    SUBSCRIBE_PULL, SUBSCRIBE_START_AFTER_BOOKMARK, SUBSCRIBE_START_AT_OLDEST_RECORD,
    SUBSCRIBE_TO_FUTURE_EVENTS,
};

/// Which events to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLogQuery {
    /// Channel name, e.g. `Security`.
    pub path: String,
    /// XPath filter, e.g. `*[System[EventID=4624]]`.
    pub filter: String,
    /// Newest-to-oldest reading. Cannot be combined with a bookmark.
    pub reverse_direction: bool,
}

impl EventLogQuery {
    pub fn new(path: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            filter: filter.into(),
            reverse_direction: false,
        }
    }

    #[must_use]
    pub fn reversed(mut self) -> Self {
        self.reverse_direction = true;
        self
    }
}

/// Where a new subscription starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPosition {
    /// Only events logged after registration.
    FutureEvents,
    /// Every retained event, oldest first.
    OldestRecord,
    /// Events after the one named by the bookmark XML.
    AfterBookmark(String),
}

/// A query plus its start position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub query: EventLogQuery,
    pub start: StartPosition,
}

impl SubscriptionRequest {
    pub fn new(query: EventLogQuery) -> Self {
        Self {
            query,
            start: StartPosition::FutureEvents,
        }
    }

    /// Reads events already in the log. Ignored once a bookmark is set.
    #[must_use]
    pub fn read_existing_events(mut self, read_existing: bool) -> Self {
        if !matches!(self.start, StartPosition::AfterBookmark(_)) {
            self.start = if read_existing {
                StartPosition::OldestRecord
            } else {
                StartPosition::FutureEvents
            };
        }
        self
    }

    #[must_use]
    pub fn with_bookmark(mut self, bookmark: impl Into<String>) -> Self {
        self.start = StartPosition::AfterBookmark(bookmark.into());
        self
    }

    pub fn bookmark(&self) -> Option<&str> {
        match &self.start {
            StartPosition::AfterBookmark(xml) => Some(xml),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), EventLogError> {
        if self.query.path.is_empty() {
            return Err(EventLogError::InvalidQuery("channel path is empty".into()));
        }
        if self.query.filter.is_empty() {
            return Err(EventLogError::InvalidQuery("filter is empty".into()));
        }
        if self.bookmark().is_some() && self.query.reverse_direction {
            return Err(EventLogError::InvalidQuery(
                "a bookmark cannot be used with a reverse-direction query".into(),
            ));
        }
        Ok(())
    }

    /// Registration flags: pull delivery plus the start position.
    pub fn flags(&self) -> u32 {
        SUBSCRIBE_PULL
            | match self.start {
                StartPosition::FutureEvents => SUBSCRIBE_TO_FUTURE_EVENTS,
                StartPosition::OldestRecord => SUBSCRIBE_START_AT_OLDEST_RECORD,
                StartPosition::AfterBookmark(_) => SUBSCRIBE_START_AFTER_BOOKMARK,
            }
    }
}
