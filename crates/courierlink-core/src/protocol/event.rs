//! Event types carried in the envelope `type` field.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Closed set of business events. New events are added as variants only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A new order is offered to a courier (`newOrderForCourier`).
    OrderOffered,
    OrderAssigned,
    OrderCancelled,
    OrderUpdated,
    /// `orderDone` on the wire.
    OrderCompleted,
    /// `updateCourierLocation` on the wire.
    CourierLocation,
    ChatMessage,
    CourierAccepted,
    CourierDeclined,
    /// `orderCreatedAck` on the wire.
    OrderAck,
    Heartbeat,
}

impl EventType {
    pub const ALL: [EventType; 11] = [
        EventType::OrderOffered,
        EventType::OrderAssigned,
        EventType::OrderCancelled,
        EventType::OrderUpdated,
        EventType::OrderCompleted,
        EventType::CourierLocation,
        EventType::ChatMessage,
        EventType::CourierAccepted,
        EventType::CourierDeclined,
        EventType::OrderAck,
        EventType::Heartbeat,
    ];

    /// Wire tag.
    pub fn as_tag(self) -> &'static str {
        match self {
            EventType::OrderOffered => "newOrderForCourier",
            EventType::OrderAssigned => "orderAssigned",
            EventType::OrderCancelled => "orderCancelled",
            EventType::OrderUpdated => "orderUpdated",
            EventType::OrderCompleted => "orderDone",
            EventType::CourierLocation => "updateCourierLocation",
            EventType::ChatMessage => "chatMessage",
            EventType::CourierAccepted => "courierAccepted",
            EventType::CourierDeclined => "courierDeclined",
            EventType::OrderAck => "orderCreatedAck",
            EventType::Heartbeat => "heartbeat",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_tag() == tag)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Envelope type tag as received.
///
/// Unknown tags are kept verbatim so they can be logged (and re-encoded
/// unchanged), but the dispatcher never routes them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventTag {
    Known(EventType),
    Unknown(String),
}

impl EventTag {
    pub fn as_str(&self) -> &str {
        match self {
            EventTag::Known(t) => t.as_tag(),
            EventTag::Unknown(s) => s,
        }
    }

    pub fn known(&self) -> Option<EventType> {
        match self {
            EventTag::Known(t) => Some(*t),
            EventTag::Unknown(_) => None,
        }
    }
}

impl From<EventType> for EventTag {
    fn from(t: EventType) -> Self {
        EventTag::Known(t)
    }
}

impl From<&str> for EventTag {
    fn from(s: &str) -> Self {
        match EventType::from_tag(s) {
            Some(t) => EventTag::Known(t),
            None => EventTag::Unknown(s.to_string()),
        }
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(EventTag::from(s.as_str()))
    }
}
