//! Decode-once codec for inbound frames.
//!
//! - Text and binary frames carry envelope JSON
//! - Frames that are not envelopes may still be a bare chat message
//! - Ping/Pong/Close are surfaced for lifecycle management

use bytes::Bytes;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use courierlink_core::error::{LinkError, Result};
use courierlink_core::protocol::codec::{decode_bare_chat, decode_envelope};
use courierlink_core::protocol::payload::ChatMessage;
use courierlink_core::protocol::Envelope;

use super::Frame;

#[derive(Debug)]
pub enum Inbound {
    Envelope(Envelope),
    BareChat(ChatMessage),
    Ping(Bytes),
    Pong(Bytes),
    Close,
}

pub fn decode_inbound(frame: Frame) -> Result<Inbound> {
    match frame {
        Frame::Text(s) => decode_data(s.as_bytes()),
        Frame::Binary(b) => decode_data(&b),
        Frame::Ping(p) => Ok(Inbound::Ping(p)),
        Frame::Pong(p) => Ok(Inbound::Pong(p)),
        Frame::Close => Ok(Inbound::Close),
    }
}

fn decode_data(bytes: &[u8]) -> Result<Inbound> {
    match decode_envelope(bytes) {
        Ok(env) => Ok(Inbound::Envelope(env)),
        Err(env_err) => match decode_bare_chat(bytes) {
            Ok(msg) => Ok(Inbound::BareChat(msg)),
            Err(_) => Err(env_err),
        },
    }
}

pub(crate) fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(s) => Message::Text(s.into()),
        Frame::Binary(b) => Message::Binary(b),
        Frame::Ping(p) => Message::Ping(p),
        Frame::Pong(p) => Message::Pong(p),
        Frame::Close => Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: String::new().into(),
        })),
    }
}

/// Raw `Message::Frame` values never surface when reading; they map to `None`.
pub(crate) fn from_message(msg: Message) -> Option<Frame> {
    match msg {
        Message::Text(s) => Some(Frame::Text(s.as_str().to_owned())),
        Message::Binary(b) => Some(Frame::Binary(b)),
        Message::Ping(p) => Some(Frame::Ping(p)),
        Message::Pong(p) => Some(Frame::Pong(p)),
        Message::Close(_) => Some(Frame::Close),
        Message::Frame(_) => None,
    }
}

pub(crate) fn transport_err(context: &str, e: impl std::fmt::Display) -> LinkError {
    LinkError::Transport(format!("{context}: {e}"))
}
