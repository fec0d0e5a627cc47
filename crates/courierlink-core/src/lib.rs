//! courierlink core: transport-agnostic protocol primitives and error types.
//!
//! This crate defines the wire contract shared by the client runtime and any
//! tooling that needs to read or produce envelopes: the closed set of event
//! types, the envelope itself, the typed payload shapes and the two-phase
//! codec. It carries no transport or runtime dependencies.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Malformed frames
//! surface as `LinkError::Decode` so the receive loop can log and move on.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ErrorClass, LinkError, Result};
