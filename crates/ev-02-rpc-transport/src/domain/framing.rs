//! # Fragment Framing
//!
//! Length-driven receive of one fragment from a byte stream.

use std::io::{self, Read};

use crate::domain::errors::TransportError;
use crate::domain::pdu::{FRAG_LENGTH_OFFSET, HEADER_LEN, RPC_VERSION, RPC_VERSION_MINOR};

/// Reads exactly one fragment.
///
/// Reads the 24-byte header in full, validates the marker, rejects a declared
/// length above `max_frag` without reading further, then reads exactly
/// `declared - 24` more bytes. A peer close before that is an error.
pub fn read_fragment<R: Read>(reader: &mut R, max_frag: u16) -> Result<Vec<u8>, TransportError> {
    let mut header = [0u8; HEADER_LEN];
    read_full(reader, &mut header)?;
    check_marker(&header)?;

    let declared = u16::from_le_bytes([header[FRAG_LENGTH_OFFSET], header[FRAG_LENGTH_OFFSET + 1]]);
    if declared > max_frag {
        return Err(TransportError::FragmentTooLarge {
            declared,
            max: max_frag,
        });
    }
    if usize::from(declared) < HEADER_LEN {
        return Err(TransportError::FragmentTooShort(declared));
    }

    let mut pdu = vec![0u8; usize::from(declared)];
    pdu[..HEADER_LEN].copy_from_slice(&header);
    read_full(reader, &mut pdu[HEADER_LEN..])?;

    tracing::trace!(ptype = header[2], frag_length = declared, "fragment received");
    Ok(pdu)
}

/// Marker check on the version bytes.
///
/// Only a header where *both* bytes are wrong is rejected; a header with
/// exactly one wrong byte passes.
fn check_marker(header: &[u8; HEADER_LEN]) -> Result<(), TransportError> {
    if header[0] != RPC_VERSION && header[1] != RPC_VERSION_MINOR {
        return Err(TransportError::BadMarker(header[0], header[1]));
    }
    Ok(())
}

/// Fills `buf` completely, retrying partial reads.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), TransportError> {
    let mut read = 0;
    while read < buf.len() {
        match reader.read(&mut buf[read..]) {
            Ok(0) => {
                return Err(TransportError::ShortRead {
                    expected: buf.len(),
                    read,
                })
            }
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
