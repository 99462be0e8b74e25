//! Service layer: the subscription session, the background watcher and the
//! connection probe.

pub mod probe;
pub mod session;
pub mod watcher;

pub use probe::{ConnectionProbe, ConnectionStatus};
pub use session::SubscriptionSession;
pub use watcher::{EventCallback, ProgressCallback, SubscriptionWatcher};

#[cfg(test)]
mod tests;
