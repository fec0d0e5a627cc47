//! Dispatcher module exports.
//!
//! Re-exports the dispatcher and its callback types so subscribers can
//! depend on this module directly.

pub mod dispatcher;

pub use dispatcher::{CloseHook, Dispatcher, Handler, OpenHook};
