//! courierlink client runtime.
//!
//! This crate wires the durable store, outgoing buffer, credential capability,
//! WebSocket transport, dispatcher and connection manager into one session
//! stack. It is consumed by the binary (`main.rs`), by the subscriber services
//! and by integration tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod auth;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod obs;
pub mod services;
pub mod store;
pub mod transport;
