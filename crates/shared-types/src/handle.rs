//! Opaque server-issued context handles.

use std::fmt;

/// Size of a context handle on the wire (4-byte attributes + 16-byte UUID).
pub const CONTEXT_HANDLE_LEN: usize = 20;

/// A 20-byte context handle.
///
/// Issued by the server and echoed back unchanged on later calls.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContextHandle([u8; CONTEXT_HANDLE_LEN]);

impl ContextHandle {
    /// The all-zero handle, used for "no handle yet" inputs.
    pub const NIL: ContextHandle = ContextHandle([0u8; CONTEXT_HANDLE_LEN]);

    pub const fn from_bytes(bytes: [u8; CONTEXT_HANDLE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CONTEXT_HANDLE_LEN] {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0 == [0u8; CONTEXT_HANDLE_LEN]
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextHandle(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}
