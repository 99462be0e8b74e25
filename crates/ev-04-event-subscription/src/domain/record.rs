//! # Event Records
//!
//! A pull returns one result buffer and an `(offset, length)` pair per
//! record. Each record starts with a 20-byte header:
//!
//! ```text
//! 0  total size
//! 4  header size
//! 8  event offset      (BinXml, relative to the record)
//! 12 bookmark offset   (relative to the record)
//! 16 BinXml size
//! ```
//!
//! The bookmark block holds its own size at +0 and the offset of the record
//! id list at +20, relative to the bookmark. The first 8 bytes of that list
//! are the record id.
//!
//! Records are views: they keep offsets, the batch keeps the bytes.

use std::ops::Range;

use crate::domain::errors::EventLogError;
use crate::domain::messages::BatchResponse;

const RECORD_HEADER_LEN: usize = 20;
const BOOKMARK_RECORD_IDS_OFFSET: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Offset of the record in the batch buffer.
    pub offset: usize,
    pub length: usize,
    pub total_size: u32,
    pub header_size: u32,
    pub event_offset: u32,
    pub bookmark_offset: u32,
    pub bin_xml_size: u32,
    pub bookmark_size: u32,
    pub record_ids_offset: u32,
    pub record_id: u64,
}

impl EventRecord {
    /// Parses the record at `buffer[offset..offset + length]`.
    pub fn parse(buffer: &[u8], offset: usize, length: usize) -> Result<Self, EventLogError> {
        let record = offset
            .checked_add(length)
            .and_then(|end| buffer.get(offset..end))
            .ok_or_else(|| {
                EventLogError::MalformedRecord(format!(
                    "record at {}+{} outside buffer of {}",
                    offset,
                    length,
                    buffer.len()
                ))
            })?;

        let total_size = read_u32(record, 0)?;
        let header_size = read_u32(record, 4)?;
        let event_offset = read_u32(record, 8)?;
        let bookmark_offset = read_u32(record, 12)?;
        let bin_xml_size = read_u32(record, 16)?;

        let event_end = event_offset as usize + bin_xml_size as usize;
        if (event_offset as usize) < RECORD_HEADER_LEN || event_end > record.len() {
            return Err(EventLogError::MalformedRecord(format!(
                "BinXml {}+{} outside record of {}",
                event_offset,
                bin_xml_size,
                record.len()
            )));
        }

        let bookmark = bookmark_offset as usize;
        let bookmark_size = read_u32(record, bookmark)?;
        let record_ids_offset = read_u32(record, bookmark + BOOKMARK_RECORD_IDS_OFFSET)?;
        let record_id = read_u64(record, bookmark + record_ids_offset as usize)?;

        Ok(Self {
            offset,
            length,
            total_size,
            header_size,
            event_offset,
            bookmark_offset,
            bin_xml_size,
            bookmark_size,
            record_ids_offset,
            record_id,
        })
    }

    /// BinXml location in the batch buffer.
    pub fn bin_xml_range(&self) -> Range<usize> {
        let start = self.offset + self.event_offset as usize;
        start..start + self.bin_xml_size as usize
    }
}

fn read_u32(record: &[u8], at: usize) -> Result<u32, EventLogError> {
    record
        .get(at..at.saturating_add(4))
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| out_of_record(at, 4, record.len()))
}

fn read_u64(record: &[u8], at: usize) -> Result<u64, EventLogError> {
    record
        .get(at..at.saturating_add(8))
        .map(|b| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(b);
            u64::from_le_bytes(raw)
        })
        .ok_or_else(|| out_of_record(at, 8, record.len()))
}

fn out_of_record(at: usize, width: usize, len: usize) -> EventLogError {
    EventLogError::MalformedRecord(format!(
        "{}-byte field at {} outside record of {}",
        width, at, len
    ))
}

/// Records delivered by one pull, in server order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBatch {
    buffer: Vec<u8>,
    records: Vec<EventRecord>,
}

impl EventBatch {
    pub fn from_response(response: BatchResponse) -> Result<Self, EventLogError> {
        let records = response
            .indices
            .iter()
            .zip(&response.sizes)
            .map(|(&offset, &size)| EventRecord::parse(&response.buffer, offset as usize, size as usize))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            buffer: response.buffer,
            records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&EventRecord> {
        self.records.last()
    }

    /// Whole result buffer.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn bin_xml(&self, record: &EventRecord) -> &[u8] {
        self.buffer.get(record.bin_xml_range()).unwrap_or(&[])
    }
}
