//! Top-level facade crate for courierlink.
//!
//! Re-exports the protocol core and the client library so apps can depend on a single crate.

pub mod core {
    pub use courierlink_core::*;
}

pub mod client {
    pub use courierlink_client::*;
}
