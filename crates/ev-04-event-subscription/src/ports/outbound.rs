//! # Outbound Ports (Driven Ports / SPI)
//!
//! What the subscription service needs from the outside:
//!
//! - `ChannelFactory` opens authenticated even6 connections. The pull
//!   connection comes first; a wait connection joins its association group.
//! - `RpcChannel` is one bound connection: request in, response stub out.
//! - `EventDecoder` turns one BinXml payload into structured fields. It is
//!   optional; without it progress is taken from the record header.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ev_02_rpc_transport::{AbortHandle, AssociationGroup, TransportError};

use crate::domain::errors::EventLogError;

// =============================================================================
// CONNECTIONS
// =============================================================================

/// Unblocks a channel's pending read from another thread.
pub trait Abort: Send + Sync {
    fn abort(&self);
}

impl Abort for AbortHandle {
    fn abort(&self) {
        AbortHandle::abort(self);
    }
}

/// One bound, authenticated connection.
///
/// Exchanges are strictly sequential: a call returns only after the whole
/// response has been read or an error occurred.
pub trait RpcChannel: Send {
    /// Sends a request and returns the response stub.
    ///
    /// `read_timeout` bounds each blocking read of the response.
    fn call(
        &mut self,
        opnum: u16,
        stub: &[u8],
        read_timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Port this channel is connected to, once known.
    fn port(&self) -> Option<u16>;

    /// Group to pass to a second connection of the same session.
    fn association_group(&self) -> Option<AssociationGroup>;

    fn abort_handle(&self) -> Option<Box<dyn Abort>>;

    /// Releases the connection. Safe to call more than once.
    fn close(&mut self);
}

pub trait ChannelFactory: Send + Sync {
    /// Opens the pull connection: connect, bind, authenticate.
    fn open_pull(&self) -> Result<Box<dyn RpcChannel>, TransportError>;

    /// Opens a wait connection to `port` in the pull connection's
    /// association group, with its own handshake.
    fn open_wait(
        &self,
        port: Option<u16>,
        group: Option<AssociationGroup>,
    ) -> Result<Box<dyn RpcChannel>, TransportError>;
}

// =============================================================================
// EVENT DECODING
// =============================================================================

/// Decoded form of one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredEvent {
    pub record_id: u64,
    pub time_created: Option<DateTime<Utc>>,
    pub fields: BTreeMap<String, String>,
}

/// Pure, stateless BinXml decoder.
pub trait EventDecoder: Send + Sync {
    /// Decodes `buffer[offset..offset + length]`.
    fn decode(
        &self,
        buffer: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<StructuredEvent, EventLogError>;
}
