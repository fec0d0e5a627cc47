//! Transport layer.
//!
//! The connection manager talks to the network only through `Transport`,
//! which opens one bidirectional frame stream and hands back its two halves.
//! `ws::WsTransport` is the WebSocket implementation; tests plug in their
//! own.

pub mod codec;
pub mod ws;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use courierlink_core::error::Result;

pub use codec::{decode_inbound, Inbound};
pub use ws::WsTransport;

/// Transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close,
}

/// Session-scoping ids sent as query parameters on connect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionScope {
    pub chat_id: Option<String>,
    pub order_id: Option<String>,
}

impl SessionScope {
    pub fn chat(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: Some(chat_id.into()),
            order_id: None,
        }
    }

    pub fn order(order_id: impl Into<String>) -> Self {
        Self {
            chat_id: None,
            order_id: Some(order_id.into()),
        }
    }

    /// Non-empty fields of `other` replace the remembered ones.
    pub fn merge(&mut self, other: SessionScope) {
        if let Some(c) = other.chat_id.filter(|s| !s.is_empty()) {
            self.chat_id = Some(c);
        }
        if let Some(o) = other.order_id.filter(|s| !s.is_empty()) {
            self.order_id = Some(o);
        }
    }
}

/// Everything needed to open one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub url: Url,
    pub bearer: String,
}

impl ConnectTarget {
    /// `base` plus `chatId` / `orderId` query parameters for every scope id
    /// present.
    pub fn build(base: &Url, scope: &SessionScope, bearer: impl Into<String>) -> Self {
        let mut url = base.clone();
        {
            let mut q = url.query_pairs_mut();
            if let Some(c) = &scope.chat_id {
                q.append_pair("chatId", c);
            }
            if let Some(o) = &scope.order_id {
                q.append_pair("orderId", o);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Self {
            url,
            bearer: bearer.into(),
        }
    }
}

/// Write half. Owned by exactly one writer task.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<()>;
    /// Close with a normal-closure code.
    async fn close(&mut self) -> Result<()>;
}

/// Read half. `None` means the stream ended.
#[async_trait]
pub trait FrameStream: Send {
    async fn next_frame(&mut self) -> Option<Result<Frame>>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection. An upgrade rejected with 401/403 is reported as
    /// `LinkError::AuthFailed`.
    async fn open(&self, target: &ConnectTarget) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>)>;
}
