//! Interface and transfer syntax identifiers.

use uuid::Uuid;

/// An interface UUID with its major/minor version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyntaxId {
    pub uuid: Uuid,
    pub major: u16,
    pub minor: u16,
}

impl SyntaxId {
    pub const fn new(uuid: Uuid, major: u16, minor: u16) -> Self {
        Self { uuid, major, minor }
    }

    /// 20-byte wire form: UUID in DCE (mixed-endian) order, then version.
    pub fn to_wire(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        out[..16].copy_from_slice(&self.uuid.to_bytes_le());
        out[16..18].copy_from_slice(&self.major.to_le_bytes());
        out[18..20].copy_from_slice(&self.minor.to_le_bytes());
        out
    }

    pub fn from_wire(bytes: &[u8; 20]) -> Self {
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&bytes[..16]);
        Self {
            uuid: Uuid::from_bytes_le(uuid),
            major: u16::from_le_bytes([bytes[16], bytes[17]]),
            minor: u16::from_le_bytes([bytes[18], bytes[19]]),
        }
    }
}

/// NDR 2.0 transfer syntax.
pub const NDR_TRANSFER_SYNTAX: SyntaxId =
    SyntaxId::new(Uuid::from_u128(0x8a885d04_1ceb_11c9_9fe8_08002b104860), 2, 0);

/// Endpoint mapper interface.
pub const EPM_SYNTAX: SyntaxId =
    SyntaxId::new(Uuid::from_u128(0xe1af8308_5d1f_11c9_91a4_08002b14a0fa), 3, 0);

/// Event log remoting protocol version 6.
pub const EVEN6_SYNTAX: SyntaxId =
    SyntaxId::new(Uuid::from_u128(0xf6beaff7_1e19_4fbb_9f8f_b89e2018337c), 1, 0);
