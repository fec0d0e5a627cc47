//! Durable outgoing buffer.
//!
//! Messages accepted while offline (or whose send failed) are kept in FIFO
//! order, bounded by capacity, mirrored to the durable store and retried by
//! `flush` once a sink is available.
//!
//! Overflow policy: when full, the oldest entry is evicted. This is lossy
//! under sustained disconnection and is logged at `warn`.

pub mod outgoing;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use courierlink_core::error::Result;
use courierlink_core::protocol::payload::ChatMessage;

pub use outgoing::OutgoingBuffer;

/// A message that can sit in the outgoing buffer.
pub trait Buffered: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// De-duplication key.
    fn identity(&self) -> &str;
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Buffered for ChatMessage {
    fn identity(&self) -> &str {
        ChatMessage::identity(self)
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Where `flush` delivers messages. `deliver` resolves once the transport has
/// accepted the frame.
#[async_trait]
pub trait BufferSink<M>: Send + Sync {
    async fn deliver(&self, msg: &M) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct BufferSettings {
    pub capacity: usize,
    pub storage_key: String,
    pub save_debounce: Duration,
    /// Upper bound for one `deliver` call during flush.
    pub send_timeout: Duration,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            capacity: 200,
            storage_key: "outgoingBuffer".into(),
            save_debounce: Duration::from_millis(250),
            send_timeout: Duration::from_secs(10),
        }
    }
}
