//! # Shared Types Crate
//!
//! Wire-level building blocks used by every EventWire crate.
//!
//! ## Contents
//!
//! - **Syntax identifiers** (`syntax`): interface UUID + version pairs and the
//!   well-known interfaces this workspace talks to.
//! - **Context handles** (`handle`): the 20-byte opaque tokens a server issues
//!   and expects back verbatim.
//! - **NDR codec** (`ndr`): the little-endian NDR20 subset needed to encode
//!   request stubs and decode response stubs.
//!
//! ## Design Principles
//!
//! - Handles are values. They are copied and compared byte-for-byte and are
//!   never interpreted.
//! - The codec only covers the shapes the modelled operations use: fixed
//!   integers, unique pointers, conformant varying strings and conformant
//!   arrays.

pub mod errors;
pub mod handle;
pub mod ndr;
pub mod syntax;

pub use errors::NdrError;
pub use handle::ContextHandle;
pub use ndr::{NdrReader, NdrWriter};
pub use syntax::{SyntaxId, EPM_SYNTAX, EVEN6_SYNTAX, NDR_TRANSFER_SYNTAX};
