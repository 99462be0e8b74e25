//! Ports for the subscription service.

pub mod inbound;
pub mod outbound;

pub use inbound::{Subscription, SubscriptionApi, WaitStatus};
pub use outbound::{Abort, ChannelFactory, EventDecoder, RpcChannel, StructuredEvent};
