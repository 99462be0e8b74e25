//! Domain layer for event subscriptions.

pub mod config;
pub mod errors;
pub mod messages;
pub mod progress;
pub mod query;
pub mod record;

pub use config::{SessionConfig, WatcherConfig};
pub use errors::EventLogError;
pub use messages::{BatchResponse, ChannelInfo, Operation, Registration, RpcInfo};
pub use progress::EventLogProgress;
pub use query::{EventLogQuery, StartPosition, SubscriptionRequest};
pub use record::{EventBatch, EventRecord};
