//! Typed payload shapes keyed by `EventType`.
//!
//! Field names follow the server's camelCase JSON. Timestamps are RFC 3339.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Searching,
    Assigned,
    Running,
    Delivering,
    Done,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrinkModel {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub image_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub coffee: DrinkModel,
    /// 1..=5
    pub sugar: u8,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourierModel {
    pub id: i64,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderModel {
    /// Server order id; absent until the server confirms the order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub machine_id: i64,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub status: OrderStatus,
    pub address: String,
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub courier: Vec<CourierModel>,
}

/// `newOrderForCourier` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderOffer {
    pub order: OrderModel,
    /// Seconds the courier has to respond.
    pub expires_in: u64,
}

/// `orderCancelled` payload (the payload itself is optional).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `updateCourierLocation` payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationFix {
    pub lat: f64,
    pub lon: f64,
    /// Unix seconds; older servers omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

/// `courierAccepted` / `courierDeclined` payload sent by the courier app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourierDecision {
    pub courier_id: i64,
    pub accepted: bool,
}

/// `orderCreatedAck` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Chat message, both inbound and buffered outbound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// `local:<uuid>` until the server assigns its own id.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub order_id: String,
    pub from_user_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// New outbound message with a local id and a fresh idempotency key.
    pub fn new(order_id: impl Into<String>, from_user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: format!("local:{}", Uuid::new_v4()),
            idempotency_key: Some(Uuid::new_v4().to_string()),
            order_id: order_id.into(),
            from_user_id: from_user_id.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// De-duplication identity: idempotency key, else the (local) id.
    pub fn identity(&self) -> &str {
        self.idempotency_key.as_deref().unwrap_or(&self.id)
    }
}

/// Fully decoded inbound event, ready for a typed callback.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    OrderOffered(OrderOffer),
    OrderAssigned { order_id: String, courier: CourierModel },
    OrderCancelled { order_id: String, reason: Option<String> },
    OrderUpdated(OrderModel),
    OrderCompleted { order_id: String },
    CourierLocation { order_id: String, fix: LocationFix },
    ChatMessage(ChatMessage),
    CourierAccepted { order_id: String, courier: CourierModel },
    CourierDeclined { order_id: String, courier: CourierModel },
    OrderAck { order_id: Option<String>, ack: OrderAck },
    Heartbeat,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn identity_prefers_idempotency_key() {
        let mut msg = ChatMessage::new("7", "u1", "hi");
        let key = msg.idempotency_key.clone().unwrap();
        assert_eq!(msg.identity(), key);
        msg.idempotency_key = None;
        assert!(msg.identity().starts_with("local:"));
    }

    #[test]
    fn order_status_is_lowercase_on_wire() {
        assert_eq!(serde_json::to_string(&OrderStatus::Delivering).unwrap(), "\"delivering\"");
    }
}
