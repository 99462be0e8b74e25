//! # NDR Codec
//!
//! Little-endian NDR20 encoding for request stubs and decoding for response
//! stubs. Alignment is relative to the start of the stub, which always sits at
//! an 8-aligned offset inside its PDU.

use uuid::Uuid;

use crate::errors::NdrError;
use crate::handle::{ContextHandle, CONTEXT_HANDLE_LEN};

/// First referent id handed out for embedded pointers.
const FIRST_REFERENT: u32 = 0x0002_0000;

/// Builds an NDR stub.
#[derive(Debug, Clone)]
pub struct NdrWriter {
    buf: Vec<u8>,
    next_referent: u32,
}

impl Default for NdrWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl NdrWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(128),
            next_referent: FIRST_REFERENT,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Pads with zero bytes up to the next multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) {
        let rem = self.buf.len() % alignment;
        if rem != 0 {
            self.buf.resize(self.buf.len() + alignment - rem, 0);
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.align(2);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.align(4);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.align(8);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// UUID in DCE byte order, 4-byte aligned.
    pub fn write_uuid(&mut self, uuid: &Uuid) {
        self.align(4);
        self.buf.extend_from_slice(&uuid.to_bytes_le());
    }

    pub fn write_context_handle(&mut self, handle: &ContextHandle) {
        self.align(4);
        self.buf.extend_from_slice(handle.as_bytes());
    }

    /// Writes a fresh non-null referent id and returns it.
    pub fn write_referent(&mut self) -> u32 {
        let referent = self.next_referent;
        self.next_referent += 4;
        self.write_u32(referent);
        referent
    }

    pub fn write_null_pointer(&mut self) {
        self.write_u32(0);
    }

    /// Conformant varying UTF-16 string including the terminating NUL.
    pub fn write_string(&mut self, value: &str) {
        let units: Vec<u16> = value.encode_utf16().chain(std::iter::once(0)).collect();
        let count = units.len() as u32;
        self.write_u32(count);
        self.write_u32(0);
        self.write_u32(count);
        for unit in units {
            self.buf.extend_from_slice(&unit.to_le_bytes());
        }
    }

    /// `[unique, string]` pointer: null or referent followed by the string.
    pub fn write_unique_string(&mut self, value: Option<&str>) {
        match value {
            Some(s) => {
                self.write_referent();
                self.write_string(s);
            }
            None => self.write_null_pointer(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads an NDR stub.
#[derive(Debug, Clone)]
pub struct NdrReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> NdrReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn align(&mut self, alignment: usize) -> Result<(), NdrError> {
        let rem = self.pos % alignment;
        if rem != 0 {
            self.skip(alignment - rem)?;
        }
        Ok(())
    }

    pub fn skip(&mut self, len: usize) -> Result<(), NdrError> {
        self.read_bytes(len).map(|_| ())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], NdrError> {
        if self.remaining() < len {
            return Err(NdrError::UnexpectedEnd {
                offset: self.pos,
                needed: len,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, NdrError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, NdrError> {
        self.align(2)?;
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, NdrError> {
        self.align(4)?;
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, NdrError> {
        self.align(8)?;
        let b = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_context_handle(&mut self) -> Result<ContextHandle, NdrError> {
        self.align(4)?;
        let b = self.read_bytes(CONTEXT_HANDLE_LEN)?;
        let mut raw = [0u8; CONTEXT_HANDLE_LEN];
        raw.copy_from_slice(b);
        Ok(ContextHandle::from_bytes(raw))
    }

    /// Reads a pointer's referent id; zero means null.
    pub fn read_pointer(&mut self) -> Result<u32, NdrError> {
        self.read_u32()
    }

    /// Reads a conformance count and checks it against `max`.
    pub fn read_count(&mut self, field: &'static str, max: u32) -> Result<u32, NdrError> {
        let value = self.read_u32()?;
        if value > max {
            return Err(NdrError::OutOfRange {
                field,
                value: u64::from(value),
                max: u64::from(max),
            });
        }
        Ok(value)
    }

    /// Conformant varying UTF-16 string; the trailing NUL is dropped.
    pub fn read_string(&mut self) -> Result<String, NdrError> {
        let max_count = self.read_u32()?;
        let offset = self.read_u32()?;
        let actual = self.read_u32()?;
        if offset != 0 || actual > max_count {
            return Err(NdrError::InvalidString(format!(
                "max {}, offset {}, actual {}",
                max_count, offset, actual
            )));
        }
        let raw = self.read_bytes(actual as usize * 2)?;
        let mut units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        if units.last() == Some(&0) {
            units.pop();
        }
        String::from_utf16(&units).map_err(|e| NdrError::InvalidString(e.to_string()))
    }

    /// Conformant array of `u32` preceded by its pointer and conformance.
    ///
    /// A null pointer decodes as an empty array.
    pub fn read_u32_array_ptr(
        &mut self,
        field: &'static str,
        max: u32,
    ) -> Result<Vec<u32>, NdrError> {
        if self.read_pointer()? == 0 {
            return Ok(Vec::new());
        }
        let count = self.read_count(field, max)?;
        (0..count).map(|_| self.read_u32()).collect()
    }

    /// Conformant byte array preceded by its pointer and conformance.
    pub fn read_byte_array_ptr(
        &mut self,
        field: &'static str,
        max: u32,
    ) -> Result<&'a [u8], NdrError> {
        if self.read_pointer()? == 0 {
            return Ok(&[]);
        }
        let count = self.read_count(field, max)?;
        self.read_bytes(count as usize)
    }
}
