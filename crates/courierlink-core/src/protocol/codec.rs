//! Two-phase envelope codec.
//!
//! Phase 1 (`decode_envelope`) parses only the outer envelope and keeps the
//! payload as raw bytes. Phase 2 (`decode_payload`, `decode_nested`,
//! `decode_event`) runs only for the event type a handler is registered for.
//!
//! Payloads are embedded as base64 blobs on encode. On decode both a base64
//! blob and an inline JSON value are accepted; the blob is only decoded in
//! phase 2, so a bad blob never fails the outer envelope.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::RawValue;

use crate::error::{LinkError, Result};

use super::envelope::{Envelope, Payload, WireIn, WireOut};
use super::event::EventType;
use super::payload::{
    Cancellation, ChatMessage, CourierModel, InboundEvent, LocationFix, OrderAck, OrderModel,
    OrderOffer,
};

/// Key under which some servers wrap the courier object.
pub const NESTED_COURIER_KEY: &str = "courier";

/// Serialize a payload value into the bytes carried by an envelope.
pub fn encode_payload<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| LinkError::Encode(format!("payload: {e}")))
}

/// Build an envelope for `event` with an optional typed payload.
pub fn envelope_for<T: Serialize + ?Sized>(
    event: EventType,
    order_id: Option<&str>,
    payload: Option<&T>,
) -> Result<Envelope> {
    let mut env = Envelope::new(event);
    env.order_id = order_id.map(str::to_owned);
    if let Some(p) = payload {
        env.payload = Some(Payload::Json(encode_payload(p)?));
    }
    Ok(env)
}

/// Encode an envelope to its text-frame JSON.
pub fn encode_envelope(env: &Envelope) -> Result<String> {
    let wire = WireOut {
        event: &env.event,
        order_id: env.order_id.as_deref(),
        payload: env.payload.as_ref().map(Payload::to_blob),
        meta: env.meta.as_ref(),
    };
    serde_json::to_string(&wire).map_err(|e| LinkError::Encode(format!("envelope: {e}")))
}

/// Phase 1: decode the outer envelope. The payload is not interpreted.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope> {
    let wire: WireIn = serde_json::from_slice(bytes)
        .map_err(|e| LinkError::Decode(format!("invalid envelope json: {e}")))?;

    let payload = match wire.payload {
        Some(raw) => Some(raw_payload_bytes(&raw)?),
        None => None,
    };

    Ok(Envelope {
        event: wire.event,
        order_id: wire.order_id,
        payload,
        meta: wire.meta,
    })
}

fn raw_payload_bytes(raw: &RawValue) -> Result<Payload> {
    let text = raw.get();
    if text.starts_with('"') {
        let blob: String = serde_json::from_str(text)
            .map_err(|e| LinkError::Decode(format!("payload blob: {e}")))?;
        Ok(Payload::Blob(blob))
    } else {
        Ok(Payload::Json(Bytes::copy_from_slice(text.as_bytes())))
    }
}

/// Phase 2: decode the payload into `T`. A missing payload is a decode error.
pub fn decode_payload<T: DeserializeOwned>(env: &Envelope) -> Result<T> {
    let bytes = env
        .payload
        .as_ref()
        .ok_or_else(|| LinkError::Decode(format!("{} requires payload", env.event)))?
        .json()?;
    serde_json::from_slice(&bytes)
        .map_err(|e| LinkError::Decode(format!("{} payload: {e}", env.event)))
}

/// Phase 2 with the one documented fallback: decode `T` from the payload
/// root, and if that fails, from the sub-object named `key`.
pub fn decode_nested<T: DeserializeOwned>(env: &Envelope, key: &str) -> Result<T> {
    let root_err = match decode_payload::<T>(env) {
        Ok(v) => return Ok(v),
        Err(e) => e,
    };

    let bytes = env.payload.as_ref().ok_or(root_err)?.json()?;
    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&bytes)
        .map_err(|e| LinkError::Decode(format!("{} payload: {e}", env.event)))?;
    let inner = map
        .get(key)
        .ok_or_else(|| LinkError::Decode(format!("{} payload has no `{key}` object", env.event)))?;
    T::deserialize(inner).map_err(|e| LinkError::Decode(format!("{} payload.{key}: {e}", env.event)))
}

/// Legacy frames: a bare chat message without an envelope.
pub fn decode_bare_chat(bytes: &[u8]) -> Result<ChatMessage> {
    serde_json::from_slice(bytes).map_err(|e| LinkError::Decode(format!("bare chat message: {e}")))
}

fn require_order_id(env: &Envelope) -> Result<String> {
    env.order_id
        .clone()
        .ok_or_else(|| LinkError::Decode(format!("{} requires orderId", env.event)))
}

/// Phase 2 for dispatch: decode the payload for a known event type.
pub fn decode_event(event: EventType, env: &Envelope) -> Result<InboundEvent> {
    let ev = match event {
        EventType::OrderOffered => InboundEvent::OrderOffered(decode_payload::<OrderOffer>(env)?),
        EventType::OrderAssigned => InboundEvent::OrderAssigned {
            order_id: require_order_id(env)?,
            courier: decode_nested::<CourierModel>(env, NESTED_COURIER_KEY)?,
        },
        EventType::OrderCancelled => {
            let order_id = require_order_id(env)?;
            let reason = match env.payload {
                Some(_) => decode_payload::<Cancellation>(env)?.reason,
                None => None,
            };
            InboundEvent::OrderCancelled { order_id, reason }
        }
        EventType::OrderUpdated => InboundEvent::OrderUpdated(decode_payload::<OrderModel>(env)?),
        EventType::OrderCompleted => InboundEvent::OrderCompleted {
            order_id: require_order_id(env)?,
        },
        EventType::CourierLocation => InboundEvent::CourierLocation {
            order_id: require_order_id(env)?,
            fix: decode_payload::<LocationFix>(env)?,
        },
        EventType::ChatMessage => InboundEvent::ChatMessage(decode_payload::<ChatMessage>(env)?),
        EventType::CourierAccepted => InboundEvent::CourierAccepted {
            order_id: require_order_id(env)?,
            courier: decode_nested::<CourierModel>(env, NESTED_COURIER_KEY)?,
        },
        EventType::CourierDeclined => InboundEvent::CourierDeclined {
            order_id: require_order_id(env)?,
            courier: decode_nested::<CourierModel>(env, NESTED_COURIER_KEY)?,
        },
        EventType::OrderAck => {
            let ack = match env.payload {
                Some(_) => decode_payload::<OrderAck>(env)?,
                None => OrderAck::default(),
            };
            InboundEvent::OrderAck {
                order_id: env.order_id.clone(),
                ack,
            }
        }
        EventType::Heartbeat => InboundEvent::Heartbeat,
    };
    Ok(ev)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::event::EventTag;

    #[test]
    fn payload_is_embedded_as_blob_and_decodes_back() {
        let fix = LocationFix { lat: 55.75, lon: 37.61, timestamp: None };
        let env = envelope_for(EventType::CourierLocation, Some("42"), Some(&fix)).unwrap();
        let text = encode_envelope(&env).unwrap();

        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "updateCourierLocation");
        assert!(v["payload"].is_string());

        let back = decode_envelope(text.as_bytes()).unwrap();
        assert_eq!(back.event, env.event);
        assert_eq!(back.order_id, env.order_id);
        assert!(matches!(back.payload, Some(Payload::Blob(_))));
        assert_eq!(decode_payload::<LocationFix>(&back).unwrap(), fix);
        assert_eq!(encode_envelope(&back).unwrap(), text);
    }

    #[test]
    fn bad_blob_fails_only_in_phase_two() {
        let env = decode_envelope(br#"{"type":"surgePricing","payload":"@@not base64@@"}"#).unwrap();
        assert!(env.event_type().is_none());

        let env = decode_envelope(br#"{"type":"chatMessage","orderId":"1","payload":"@@"}"#).unwrap();
        let err = decode_event(EventType::ChatMessage, &env).unwrap_err();
        assert_eq!(err.class().as_str(), "DECODE");
    }

    #[test]
    fn inline_payload_and_integer_order_id_are_accepted() {
        let raw = br#"{"type":"orderCancelled","orderId":17,"payload":{"reason":"no couriers"}}"#;
        let env = decode_envelope(raw).unwrap();
        assert_eq!(env.order_id.as_deref(), Some("17"));
        match decode_event(EventType::OrderCancelled, &env).unwrap() {
            InboundEvent::OrderCancelled { order_id, reason } => {
                assert_eq!(order_id, "17");
                assert_eq!(reason.as_deref(), Some("no couriers"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn nested_courier_fallback() {
        let raw = br#"{"type":"courierAccepted","orderId":"9","payload":{"courier":{"id":3,"name":"Ann","lat":1.0,"lon":2.0},"note":"x"}}"#;
        let env = decode_envelope(raw).unwrap();
        match decode_event(EventType::CourierAccepted, &env).unwrap() {
            InboundEvent::CourierAccepted { courier, .. } => assert_eq!(courier.name, "Ann"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn payload_without_expected_shape_is_a_decode_error() {
        let raw = br#"{"type":"orderAssigned","orderId":"9","payload":{"driver":{}}}"#;
        let env = decode_envelope(raw).unwrap();
        let err = decode_event(EventType::OrderAssigned, &env).unwrap_err();
        assert_eq!(err.class().as_str(), "DECODE");
    }

    #[test]
    fn unknown_type_decodes_but_stays_unknown() {
        let env = decode_envelope(br#"{"type":"promo","payload":{"a":1}}"#).unwrap();
        assert_eq!(env.event, EventTag::Unknown("promo".into()));
        assert!(env.event_type().is_none());
    }
}
