//! # RPC Transport (EV-02)
//!
//! One TCP connection to a connection-oriented RPC server.
//!
//! ## Architecture
//!
//! This crate follows hexagonal architecture:
//! - **Domain Layer** (`domain/`): PDU layout, fragment framing, binding and
//!   connection configuration. No sockets.
//! - **Ports Layer** (`ports/`): `EndpointResolver` and `SecurityProvider`,
//!   implemented by the endpoint mapper and session security crates.
//! - **Service Layer** (`service/`): `TransportConnection`, which binds,
//!   sends, receives and reassembles over a socket.
//! - **Adapters Layer** (`adapters/`): TCP connect with timeouts and I/O error
//!   classification.
//!
//! ## Framing
//!
//! Every PDU starts with a 24-byte header. The fragment length lives at
//! offset 8. A receive reads the header in full, checks the declared length
//! against the negotiated maximum, then reads exactly the remainder.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use domain::binding::{AssociationGroup, AuthLevel, Binding};
pub use domain::config::ConnectionConfig;
pub use domain::errors::TransportError;
pub use domain::framing::read_fragment;
pub use domain::pdu::{PacketType, PduHeader, HEADER_LEN};
pub use ports::outbound::{EndpointResolver, ResolutionError, SecurityError, SecurityProvider};
pub use service::{AbortHandle, TransportConnection};
