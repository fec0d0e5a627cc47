//! Protocol modules.
//!
//! - `event`: the closed set of business event types and their wire tags.
//! - `envelope`: the outer wrapper (type tag, order id, opaque payload, meta).
//! - `payload`: typed payload shapes keyed by event type.
//! - `codec`: two-phase decoding (envelope first, payload on demand) and
//!   encoding with the payload embedded as a serialized blob.
//!
//! Decoders never panic; malformed input is reported as `LinkError::Decode`.

pub mod codec;
pub mod envelope;
pub mod event;
pub mod payload;

pub use envelope::{Envelope, Payload};
pub use event::{EventTag, EventType};
