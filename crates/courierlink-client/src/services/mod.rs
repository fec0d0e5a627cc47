//! Subscriber services built on one `ConnectionManager`.
//!
//! Each service is constructed with the manager (and the store where it
//! persists anything) and claims the callback slots it needs. Callback slots
//! are single-subscriber: attaching a service replaces whatever was there.

pub mod chat;
pub mod courier;
pub mod location;
pub mod orders;

pub use chat::ChatService;
pub use courier::CourierService;
pub use location::LocationPublisher;
pub use orders::{OrderEvent, OrderService};
