//! Envelope: outer typed wrapper around one business event.
//!
//! Wire shape:
//! `{ "type": "<tag>", "orderId": "<id>"?, "payload": <blob or object>?, "meta": {..}? }`
//!
//! The payload is held as raw serialized JSON bytes so the outer envelope can
//! be decoded and routed before the payload's shape is known.

use std::collections::BTreeMap;

use std::borrow::Cow;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

use crate::error::{LinkError, Result};

use super::event::{EventTag, EventType};

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub event: EventTag,
    pub order_id: Option<String>,
    pub payload: Option<Payload>,
    pub meta: Option<BTreeMap<String, String>>,
}

/// Type-specific payload, kept opaque until phase 2.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Serialized JSON (built locally, or received inline).
    Json(Bytes),
    /// Base64 blob exactly as received; decoded on first use.
    Blob(String),
}

impl Payload {
    /// Payload JSON bytes. Decodes a blob; a bad blob is a decode error.
    pub fn json(&self) -> Result<Cow<'_, [u8]>> {
        match self {
            Payload::Json(b) => Ok(Cow::Borrowed(b.as_ref())),
            Payload::Blob(s) => STANDARD
                .decode(s.as_bytes())
                .map(Cow::Owned)
                .map_err(|e| LinkError::Decode(format!("payload base64: {e}"))),
        }
    }

    /// Wire text for the blob form.
    pub(crate) fn to_blob(&self) -> String {
        match self {
            Payload::Json(b) => STANDARD.encode(b),
            Payload::Blob(s) => s.clone(),
        }
    }
}

impl Envelope {
    pub fn new(event: impl Into<EventTag>) -> Self {
        Self {
            event: event.into(),
            order_id: None,
            payload: None,
            meta: None,
        }
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = Some(Payload::Json(payload));
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn event_type(&self) -> Option<EventType> {
        self.event.known()
    }
}

/// Outbound wire form; the payload is carried as a base64 blob.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireOut<'a> {
    #[serde(rename = "type")]
    pub event: &'a EventTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<&'a BTreeMap<String, String>>,
}

/// Inbound wire form. Unknown fields are ignored; the payload stays raw.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireIn {
    #[serde(rename = "type")]
    pub event: EventTag,
    #[serde(default, deserialize_with = "string_or_int")]
    pub order_id: Option<String>,
    #[serde(default)]
    pub payload: Option<Box<RawValue>>,
    #[serde(default)]
    pub meta: Option<BTreeMap<String, String>>,
}

/// Order ids arrive as strings from newer servers and integers from older ones.
fn string_or_int<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Int(i64),
    }

    Ok(Option::<Id>::deserialize(deserializer)?.map(|id| match id {
        Id::Text(s) => s,
        Id::Int(n) => n.to_string(),
    }))
}
