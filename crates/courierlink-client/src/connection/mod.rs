//! Connection lifecycle.
//!
//! - `state`: the published `ConnectionState` and `CloseReason`
//! - `backoff`: reconnect delay policy
//! - `manager`: the public handle and the single actor that owns the state
//! - `tasks`: per-link writer, receive and heartbeat tasks

pub mod backoff;
pub mod manager;
pub mod state;
mod tasks;

pub use backoff::ReconnectPolicy;
pub use manager::{ConnectionManager, LinkSettings};
pub use state::{CloseReason, ConnectionState};
