//! # ept_map
//!
//! Request and response stubs for the mapping call (opnum 3).
//!
//! ```text
//! request:  [unique] object uuid, [unique] map tower, entry handle (20),
//!           max towers
//! response: entry handle (20), num towers,
//!           conformant varying array of [unique] tower pointers, towers,
//!           status
//! ```

use shared_types::{ContextHandle, NdrError, NdrReader, NdrWriter};
use uuid::Uuid;

pub const EPT_MAP_OPNUM: u16 = 3;

/// Towers requested per call.
pub const MAX_TOWERS: u32 = 4;

/// Largest tower accepted from the mapper.
const MAX_TOWER_LEN: u32 = 0xFFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapResponse {
    pub entry_handle: ContextHandle,
    pub towers: Vec<Vec<u8>>,
    pub status: u32,
}

/// Encodes a mapping request for `tower` with a nil object and entry handle.
pub fn encode_request(tower: &[u8]) -> Vec<u8> {
    let mut w = NdrWriter::new();
    w.write_referent();
    w.write_uuid(&Uuid::nil());
    w.write_referent();
    write_tower(&mut w, tower);
    w.write_context_handle(&ContextHandle::NIL);
    w.write_u32(MAX_TOWERS);
    w.into_bytes()
}

pub fn decode_response(stub: &[u8]) -> Result<MapResponse, NdrError> {
    let mut r = NdrReader::new(stub);
    let entry_handle = r.read_context_handle()?;
    let num_towers = r.read_u32()?;

    let max = r.read_count("towers", MAX_TOWERS)?;
    let offset = r.read_u32()?;
    let actual = r.read_count("towers", max)?;
    if offset != 0 {
        return Err(NdrError::Malformed(format!("tower array offset {}", offset)));
    }
    let referents = (0..actual)
        .map(|_| r.read_pointer())
        .collect::<Result<Vec<_>, _>>()?;

    let mut towers = Vec::with_capacity(referents.len());
    for referent in referents {
        if referent == 0 {
            continue;
        }
        let conformance = r.read_count("tower_length", MAX_TOWER_LEN)?;
        let length = r.read_u32()?;
        if length > conformance {
            return Err(NdrError::Malformed(format!(
                "tower length {} exceeds conformance {}",
                length, conformance
            )));
        }
        let bytes = r.read_bytes(conformance as usize)?;
        towers.push(bytes[..length as usize].to_vec());
    }
    towers.truncate(num_towers as usize);

    let status = r.read_u32()?;
    Ok(MapResponse {
        entry_handle,
        towers,
        status,
    })
}

/// Encodes a mapping response the way a mapper answers.
pub fn encode_response(towers: &[Vec<u8>], status: u32) -> Vec<u8> {
    let mut w = NdrWriter::new();
    w.write_context_handle(&ContextHandle::NIL);
    w.write_u32(towers.len() as u32);
    w.write_u32(MAX_TOWERS);
    w.write_u32(0);
    w.write_u32(towers.len() as u32);
    for _ in towers {
        w.write_referent();
    }
    for tower in towers {
        write_tower(&mut w, tower);
    }
    w.write_u32(status);
    w.into_bytes()
}

fn write_tower(w: &mut NdrWriter, tower: &[u8]) {
    w.write_u32(tower.len() as u32);
    w.write_u32(tower.len() as u32);
    w.write_bytes(tower);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tower::encode_tower;
    use shared_types::EVEN6_SYNTAX;

    #[test]
    fn test_request_layout() {
        let tower = encode_tower(&EVEN6_SYNTAX, 0, [0; 4]);
        let stub = encode_request(&tower);

        // object referent + nil uuid
        assert_eq!(&stub[..4], &0x0002_0000u32.to_le_bytes());
        assert!(stub[4..20].iter().all(|b| *b == 0));
        // tower referent, conformance, length
        assert_eq!(&stub[20..24], &0x0002_0004u32.to_le_bytes());
        assert_eq!(&stub[24..28], &75u32.to_le_bytes());
        assert_eq!(&stub[28..32], &75u32.to_le_bytes());
        assert_eq!(&stub[32..107], tower.as_slice());
        // pad to 4, entry handle, max towers
        assert_eq!(stub.len(), 108 + 20 + 4);
        assert_eq!(&stub[128..], &4u32.to_le_bytes());
    }

    #[test]
    fn test_response_with_one_tower() {
        let tower = encode_tower(&EVEN6_SYNTAX, 49667, [0; 4]);
        let stub = encode_response(&[tower.clone()], 0);

        let response = decode_response(&stub).unwrap();
        assert_eq!(response.status, 0);
        assert_eq!(response.towers, vec![tower]);
        assert!(response.entry_handle.is_nil());
    }

    #[test]
    fn test_response_without_towers() {
        let stub = encode_response(&[], 0x16c9a0d6);
        let response = decode_response(&stub).unwrap();
        assert!(response.towers.is_empty());
        assert_eq!(response.status, 0x16c9a0d6);
    }

    #[test]
    fn test_too_many_towers_rejected() {
        let mut stub = encode_response(&[], 0);
        // max_count
        stub[24..28].copy_from_slice(&9u32.to_le_bytes());
        assert!(matches!(
            decode_response(&stub),
            Err(NdrError::OutOfRange { field: "towers", .. })
        ));
    }

    #[test]
    fn test_truncated_response() {
        let tower = encode_tower(&EVEN6_SYNTAX, 49667, [0; 4]);
        let stub = encode_response(&[tower], 0);
        assert!(matches!(
            decode_response(&stub[..60]),
            Err(NdrError::UnexpectedEnd { .. })
        ));
    }
}
