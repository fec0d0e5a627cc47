//! Per-link background tasks.
//!
//! Each live link runs a writer (sole owner of the sink), a receive loop and a
//! heartbeat loop. None of them touch `ConnectionState`; they report to the
//! manager actor with their link epoch so late reports can be discarded.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};

use courierlink_core::error::{LinkError, Result};
use courierlink_core::protocol::codec::{encode_envelope, envelope_for};
use courierlink_core::protocol::payload::ChatMessage;
use courierlink_core::protocol::EventType;

use crate::buffer::BufferSink;
use crate::dispatch::Dispatcher;
use crate::obs::LinkStats;
use crate::transport::{decode_inbound, Frame, FrameSink, FrameStream, Inbound};

use super::state::CloseReason;

/// Upper bound for the close handshake on teardown.
pub(crate) const CLOSE_GRACE: Duration = Duration::from_secs(2);

pub(crate) type Ack = oneshot::Sender<Result<()>>;

pub(crate) enum WriterMsg {
    /// Frame plus an optional completion callback.
    Frame(Frame, Option<Ack>),
    Close,
}

/// Reports from tasks back to the actor.
pub(crate) enum LinkEvent {
    Opened {
        epoch: u64,
        sink: Box<dyn FrameSink>,
        stream: Box<dyn FrameStream>,
    },
    ConnectFailed {
        epoch: u64,
        error: LinkError,
    },
    LinkLost {
        epoch: u64,
        reason: CloseReason,
    },
    ReconnectDue {
        epoch: u64,
    },
}

pub(crate) async fn writer_loop(
    epoch: u64,
    mut sink: Box<dyn FrameSink>,
    mut rx: mpsc::UnboundedReceiver<WriterMsg>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            WriterMsg::Frame(frame, ack) => {
                let res = sink.send(frame).await;
                let failure = res.as_ref().err().cloned();
                match ack {
                    Some(ack) => {
                        let _ = ack.send(res);
                    }
                    None => {
                        if let Err(e) = &res {
                            tracing::warn!(error = %e, "frame send failed");
                        }
                    }
                }
                if let Some(e) = failure {
                    let _ = events.send(LinkEvent::LinkLost {
                        epoch,
                        reason: CloseReason::Transport(e.to_string()),
                    });
                    return;
                }
            }
            WriterMsg::Close => break,
        }
    }

    match timeout(CLOSE_GRACE, sink.close()).await {
        Ok(Ok(())) => tracing::debug!(epoch, "link closed"),
        Ok(Err(e)) => tracing::debug!(epoch, error = %e, "close failed"),
        Err(_) => tracing::debug!(epoch, "close handshake timed out"),
    }
}

pub(crate) async fn receive_loop(
    epoch: u64,
    mut stream: Box<dyn FrameStream>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<LinkStats>,
    pongs: mpsc::UnboundedSender<Bytes>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let reason = loop {
        let frame = match stream.next_frame().await {
            None => break CloseReason::Transport("stream ended".into()),
            Some(Err(e)) => break CloseReason::Transport(e.to_string()),
            Some(Ok(frame)) => frame,
        };
        stats.frame_in();

        match decode_inbound(frame) {
            Ok(Inbound::Envelope(env)) => dispatcher.dispatch(&env),
            Ok(Inbound::BareChat(msg)) => dispatcher.dispatch_chat(msg),
            Ok(Inbound::Pong(payload)) => {
                let _ = pongs.send(payload);
            }
            // Ping replies are the transport's job.
            Ok(Inbound::Ping(_)) => {}
            Ok(Inbound::Close) => break CloseReason::ServerClosed,
            Err(e) => {
                stats.decode_drop();
                tracing::warn!(error = %e, "inbound frame dropped");
            }
        }
    };

    tracing::debug!(epoch, %reason, "receive loop ended");
    let _ = events.send(LinkEvent::LinkLost { epoch, reason });
}

pub(crate) async fn heartbeat_loop(
    epoch: u64,
    interval: Duration,
    pong_timeout: Duration,
    writer: mpsc::UnboundedSender<WriterMsg>,
    mut pongs: mpsc::UnboundedReceiver<Bytes>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let mut seq: u64 = 0;
    let reason = loop {
        sleep(interval).await;

        // Only a pong that arrives after this ping counts.
        while pongs.try_recv().is_ok() {}

        seq += 1;
        let attempt = ping_once(seq, &writer, &mut pongs);

        match timeout(pong_timeout, attempt).await {
            Ok(Ok(())) => tracing::trace!(epoch, seq, "pong"),
            Ok(Err(reason)) => break reason,
            Err(_) => break CloseReason::PingTimeout,
        }
    };

    tracing::debug!(epoch, %reason, "heartbeat ended");
    let _ = events.send(LinkEvent::LinkLost { epoch, reason });
}

/// One ping, its send completion, then the first pong after it.
async fn ping_once(
    seq: u64,
    writer: &mpsc::UnboundedSender<WriterMsg>,
    pongs: &mut mpsc::UnboundedReceiver<Bytes>,
) -> std::result::Result<(), CloseReason> {
    let (ack_tx, ack_rx) = oneshot::channel();
    let ping = Frame::Ping(Bytes::copy_from_slice(&seq.to_be_bytes()));
    if writer.send(WriterMsg::Frame(ping, Some(ack_tx))).is_err() {
        return Err(CloseReason::Transport("writer gone".into()));
    }
    match ack_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(CloseReason::Transport(format!("ping: {e}"))),
        Err(_) => return Err(CloseReason::Transport("writer gone".into())),
    }
    match pongs.recv().await {
        Some(_) => Ok(()),
        None => Err(CloseReason::Transport("receive loop gone".into())),
    }
}

/// Buffer flush target bound to one live link. Each delivery waits for the
/// writer to report that the frame went out.
pub(crate) struct ChatSink {
    pub(crate) writer: mpsc::UnboundedSender<WriterMsg>,
    pub(crate) stats: Arc<LinkStats>,
}

#[async_trait]
impl BufferSink<ChatMessage> for ChatSink {
    async fn deliver(&self, msg: &ChatMessage) -> Result<()> {
        let env = envelope_for(EventType::ChatMessage, Some(msg.order_id.as_str()), Some(msg))?;
        let text = encode_envelope(&env)?;

        let (ack_tx, ack_rx) = oneshot::channel();
        self.writer
            .send(WriterMsg::Frame(Frame::Text(text), Some(ack_tx)))
            .map_err(|_| LinkError::NotConnected)?;
        ack_rx.await.map_err(|_| LinkError::NotConnected)??;

        self.stats.envelope_sent();
        Ok(())
    }
}
