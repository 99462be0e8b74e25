//! # Protocol Towers
//!
//! A tower is a floor count followed by floors. Each floor is
//! `lhs_len (u16 LE) | protocol tag | lhs payload | rhs_len (u16 LE) | rhs`.
//!
//! The mapping request uses a fixed five-floor tower:
//!
//! ```text
//! floor 1  UUID tag, interface uuid + major | minor
//! floor 2  UUID tag, NDR uuid + 2           | 0
//! floor 3  connection-oriented RPC          | 0
//! floor 4  TCP                              | port (u16 BE)
//! floor 5  IP                               | address (4 bytes)
//! ```

use ev_02_rpc_transport::ResolutionError;
use shared_types::{SyntaxId, NDR_TRANSFER_SYNTAX};

pub const FLOOR_COUNT: u16 = 5;

const PROTOCOL_UUID: u8 = 0x0d;
const PROTOCOL_RPC_CO: u8 = 0x0b;
const PROTOCOL_TCP: u8 = 0x07;
const PROTOCOL_IP: u8 = 0x09;

/// Bytes of a UUID floor: lhs_len(2) + tag(1) + uuid(16) + major(2) + rhs_len(2) + minor(2).
const UUID_FLOOR_LEN: usize = 25;
/// Bytes of the protocol floor: lhs_len(2) + tag(1) + rhs_len(2) + minor(2).
const RPC_FLOOR_LEN: usize = 7;
/// Offset of the TCP floor.
const TCP_FLOOR_OFFSET: usize = 2 + 2 * UUID_FLOOR_LEN + RPC_FLOOR_LEN;

/// Encodes the five-floor TCP/IP tower for `interface`.
///
/// A mapping request passes port 0 and address 0.0.0.0.
pub fn encode_tower(interface: &SyntaxId, port: u16, address: [u8; 4]) -> Vec<u8> {
    let mut out = Vec::with_capacity(TCP_FLOOR_OFFSET + 16);
    out.extend_from_slice(&FLOOR_COUNT.to_le_bytes());
    uuid_floor(&mut out, interface);
    uuid_floor(&mut out, &NDR_TRANSFER_SYNTAX);
    simple_floor(&mut out, PROTOCOL_RPC_CO, &0u16.to_le_bytes());
    simple_floor(&mut out, PROTOCOL_TCP, &port.to_be_bytes());
    simple_floor(&mut out, PROTOCOL_IP, &address);
    out
}

/// Extracts the TCP port from a returned tower.
///
/// Walks past the two UUID floors and the protocol floor, checks the fourth
/// floor is TCP, and reads its right-hand side big-endian.
pub fn tcp_port(tower: &[u8]) -> Result<u16, ResolutionError> {
    if tower.len() < TCP_FLOOR_OFFSET + 7 {
        return Err(ResolutionError::TowerMismatch(format!(
            "tower of {} bytes is too short",
            tower.len()
        )));
    }
    let floors = read_u16_le(tower, 0);
    if floors < 4 {
        return Err(ResolutionError::TowerMismatch(format!(
            "{} floors",
            floors
        )));
    }
    if tower[4] != PROTOCOL_UUID || tower[2 + UUID_FLOOR_LEN + 2] != PROTOCOL_UUID {
        return Err(ResolutionError::TowerMismatch(
            "first two floors are not UUID floors".into(),
        ));
    }

    let mut at = TCP_FLOOR_OFFSET;
    let lhs_len = read_u16_le(tower, at);
    at += 2;
    let protocol = tower[at];
    at += 1;
    if lhs_len != 1 || protocol != PROTOCOL_TCP {
        return Err(ResolutionError::TowerMismatch(format!(
            "floor 4 protocol {:#04x} is not TCP",
            protocol
        )));
    }
    let rhs_len = read_u16_le(tower, at);
    at += 2;
    if rhs_len != 2 {
        return Err(ResolutionError::TowerMismatch(format!(
            "TCP floor rhs length {}",
            rhs_len
        )));
    }
    Ok(u16::from_be_bytes([tower[at], tower[at + 1]]))
}

fn uuid_floor(out: &mut Vec<u8>, syntax: &SyntaxId) {
    out.extend_from_slice(&19u16.to_le_bytes());
    out.push(PROTOCOL_UUID);
    out.extend_from_slice(&syntax.uuid.to_bytes_le());
    out.extend_from_slice(&syntax.major.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&syntax.minor.to_le_bytes());
}

fn simple_floor(out: &mut Vec<u8>, protocol: u8, rhs: &[u8]) {
    out.extend_from_slice(&1u16.to_le_bytes());
    out.push(protocol);
    out.extend_from_slice(&(rhs.len() as u16).to_le_bytes());
    out.extend_from_slice(rhs);
}

fn read_u16_le(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}
