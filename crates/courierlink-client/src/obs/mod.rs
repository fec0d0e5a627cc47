//! Observability helpers.

pub mod stats;

pub use stats::{LinkStats, StatsSnapshot};
