//! # Endpoint Mapper (EV-01)
//!
//! Resolves the dynamic TCP port serving an RPC interface by asking the
//! endpoint mapper on its well-known port.
//!
//! ## Architecture
//!
//! - **Domain Layer** (`domain/`): tower encoding and parsing, the `ept_map`
//!   request and response stubs, mapper configuration.
//! - **Service Layer** (`service`): `EndpointMapper`, which implements the
//!   transport's `EndpointResolver` port over a short-lived unauthenticated
//!   connection.
//!
//! There is no retry here. Every failure surfaces as a `ResolutionError`.

pub mod domain;
pub mod service;

pub use domain::config::MapperConfig;
pub use domain::tower::{encode_tower, tcp_port};
pub use service::EndpointMapper;
