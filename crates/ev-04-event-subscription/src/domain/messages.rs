//! # even6 Messages
//!
//! Request stubs and response decoding for the remote subscription calls of
//! the EventLog remoting protocol.
//!
//! | Operation | Opnum | Request | Response |
//! |-----------|-------|---------|----------|
//! | `EvtRpcRegisterRemoteSubscription` | 0 | path, filter, bookmark, flags | handles, channel info, error info, status |
//! | `EvtRpcRemoteSubscriptionNext` | 2 | handle, max records, timeout, flags | batch, status |
//! | `EvtRpcRemoteSubscriptionWaitAsync` | 3 | handle | status |
//! | `EvtRpcClose` | 13 | handle | zeroed handle, status |
//! | `EvtRpcCancel` | 14 | control handle | status |
//!
//! Batched responses share one decoder, tagged with the operation for error
//! reporting.

use std::fmt;
use std::time::Duration;

use shared_types::{ContextHandle, NdrReader, NdrWriter};

use crate::domain::errors::EventLogError;

/// Most records one batch may carry.
pub const MAX_RECORD_COUNT: u32 = 1024;

/// Largest result buffer one batch may carry.
pub const MAX_BATCH_SIZE: u32 = 2 * 1024 * 1024;

/// Most channel entries a registration may report.
pub const MAX_CHANNEL_COUNT: u32 = 512;

// Subscription flags
pub const SUBSCRIBE_TO_FUTURE_EVENTS: u32 = 0x0000_0001;
pub const SUBSCRIBE_START_AT_OLDEST_RECORD: u32 = 0x0000_0002;
pub const SUBSCRIBE_START_AFTER_BOOKMARK: u32 = 0x0000_0003;
pub const SUBSCRIBE_PULL: u32 = 0x1000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Register,
    Next,
    Wait,
    Close,
    Cancel,
}

impl Operation {
    pub fn opnum(self) -> u16 {
        match self {
            Operation::Register => 0,
            Operation::Next => 2,
            Operation::Wait => 3,
            Operation::Close => 13,
            Operation::Cancel => 14,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::Register => "EvtRpcRegisterRemoteSubscription",
            Operation::Next => "EvtRpcRemoteSubscriptionNext",
            Operation::Wait => "EvtRpcRemoteSubscriptionWaitAsync",
            Operation::Close => "EvtRpcClose",
            Operation::Cancel => "EvtRpcCancel",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// REQUESTS
// =============================================================================

pub fn encode_register(path: &str, filter: &str, bookmark: Option<&str>, flags: u32) -> Vec<u8> {
    let mut w = NdrWriter::new();
    w.write_unique_string(Some(path));
    w.write_string(filter);
    w.write_unique_string(bookmark);
    w.write_u32(flags);
    w.into_bytes()
}

/// `timeout` is carried in milliseconds and saturates at `u32::MAX`.
pub fn encode_next(handle: &ContextHandle, requested: u32, timeout: Duration) -> Vec<u8> {
    let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
    let mut w = NdrWriter::new();
    w.write_context_handle(handle);
    w.write_u32(requested);
    w.write_u32(timeout_ms);
    w.write_u32(0);
    w.into_bytes()
}

/// Request stub for wait, cancel and close: the handle alone.
pub fn encode_handle(handle: &ContextHandle) -> Vec<u8> {
    let mut w = NdrWriter::new();
    w.write_context_handle(handle);
    w.into_bytes()
}

// =============================================================================
// RESPONSES
// =============================================================================

/// One entry of the registration's channel list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: String,
    pub status: u32,
}

/// Extended error information returned with a registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RpcInfo {
    pub error: u32,
    pub sub_error: u32,
    pub sub_error_param: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub handle: ContextHandle,
    pub control: ContextHandle,
    pub channels: Vec<ChannelInfo>,
    pub error: RpcInfo,
    pub status: u32,
}

impl Registration {
    pub fn decode(stub: &[u8]) -> Result<Self, EventLogError> {
        let op = Operation::Register;
        let wrap = |e| EventLogError::decode(op, e);
        let mut r = NdrReader::new(stub);

        let handle = r.read_context_handle().map_err(wrap)?;
        let control = r.read_context_handle().map_err(wrap)?;
        let count = r.read_count("queryChannelInfoSize", MAX_CHANNEL_COUNT).map_err(wrap)?;

        let mut channels = Vec::new();
        if r.read_pointer().map_err(wrap)? != 0 {
            let conformance = r.read_count("queryChannelInfo", MAX_CHANNEL_COUNT).map_err(wrap)?;
            if conformance != count {
                return Err(EventLogError::decode(
                    op,
                    shared_types::NdrError::Malformed(format!(
                        "channel count {} but array of {}",
                        count, conformance
                    )),
                ));
            }
            let mut entries = Vec::with_capacity(conformance as usize);
            for _ in 0..conformance {
                let name_ptr = r.read_pointer().map_err(wrap)?;
                let status = r.read_u32().map_err(wrap)?;
                entries.push((name_ptr, status));
            }
            for (name_ptr, status) in entries {
                let name = if name_ptr == 0 {
                    String::new()
                } else {
                    r.read_string().map_err(wrap)?
                };
                channels.push(ChannelInfo { name, status });
            }
        }

        let error = RpcInfo {
            error: r.read_u32().map_err(wrap)?,
            sub_error: r.read_u32().map_err(wrap)?,
            sub_error_param: r.read_u32().map_err(wrap)?,
        };
        let status = r.read_u32().map_err(wrap)?;
        Ok(Self {
            handle,
            control,
            channels,
            error,
            status,
        })
    }
}

/// Decoded batched-event response.
///
/// Every `(indices[i], sizes[i])` pair lies inside `buffer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResponse {
    pub indices: Vec<u32>,
    pub sizes: Vec<u32>,
    pub buffer: Vec<u8>,
    pub status: u32,
}

impl BatchResponse {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Decodes `numActualRecords`, the index and size arrays, the result
    /// buffer and the return status.
    ///
    /// `requested` bounds the record count on top of the protocol maximum.
    pub fn decode(op: Operation, stub: &[u8], requested: u32) -> Result<Self, EventLogError> {
        let wrap = |e| EventLogError::decode(op, e);
        let malformed = |msg: String| EventLogError::decode(op, shared_types::NdrError::Malformed(msg));
        let mut r = NdrReader::new(stub);

        let max = requested.min(MAX_RECORD_COUNT);
        let actual = r.read_count("numActualRecords", max).map_err(wrap)?;
        let indices = r.read_u32_array_ptr("eventDataIndices", max).map_err(wrap)?;
        let sizes = r.read_u32_array_ptr("eventDataSizes", max).map_err(wrap)?;
        if indices.len() != actual as usize || sizes.len() != actual as usize {
            return Err(malformed(format!(
                "numActualRecords {} with {} indices and {} sizes",
                actual,
                indices.len(),
                sizes.len()
            )));
        }

        let buffer_size = r.read_count("resultBufferSize", MAX_BATCH_SIZE).map_err(wrap)?;
        let buffer = r.read_byte_array_ptr("resultBuffer", MAX_BATCH_SIZE).map_err(wrap)?;
        if buffer.len() != buffer_size as usize {
            return Err(malformed(format!(
                "resultBufferSize {} but array of {}",
                buffer_size,
                buffer.len()
            )));
        }
        let status = r.read_u32().map_err(wrap)?;

        for (i, (&offset, &size)) in indices.iter().zip(&sizes).enumerate() {
            let end = u64::from(offset) + u64::from(size);
            if end > buffer.len() as u64 {
                return Err(EventLogError::MalformedRecord(format!(
                    "record {} at {}+{} outside buffer of {}",
                    i,
                    offset,
                    size,
                    buffer.len()
                )));
            }
        }

        Ok(Self {
            indices,
            sizes,
            buffer: buffer.to_vec(),
            status,
        })
    }
}

/// Return value of a wait or cancel.
pub fn decode_status(op: Operation, stub: &[u8]) -> Result<u32, EventLogError> {
    NdrReader::new(stub)
        .read_u32()
        .map_err(|e| EventLogError::decode(op, e))
}

/// Return value of a close; the echoed handle is skipped.
pub fn decode_close(stub: &[u8]) -> Result<u32, EventLogError> {
    let mut r = NdrReader::new(stub);
    let wrap = |e| EventLogError::decode(Operation::Close, e);
    r.read_context_handle().map_err(wrap)?;
    r.read_u32().map_err(wrap)
}
