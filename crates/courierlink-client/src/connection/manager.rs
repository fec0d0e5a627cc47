//! Connection manager: public handle plus the actor that owns the link.
//!
//! Every state transition happens inside one actor task. The handle only
//! sends commands, and the per-link tasks only report events, so the
//! "already connecting / already connected" guards cannot race.
//!
//! Each connect attempt gets a fresh epoch. Reports carrying an older epoch
//! (a socket that opened after `disconnect`, a read error from a link that
//! was already replaced) are discarded.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use url::Url;

use courierlink_core::error::{LinkError, Result};
use courierlink_core::protocol::codec::{decode_payload, encode_envelope, encode_payload};
use courierlink_core::protocol::payload::{
    Cancellation, ChatMessage, CourierDecision, CourierModel, InboundEvent, LocationFix, OrderAck,
    OrderModel, OrderOffer,
};
use courierlink_core::protocol::{Envelope, EventType, Payload};

use crate::auth::{ensure_credential, CredentialProvider};
use crate::buffer::OutgoingBuffer;
use crate::dispatch::Dispatcher;
use crate::obs::LinkStats;
use crate::transport::{ConnectTarget, Frame, FrameSink, FrameStream, SessionScope, Transport};

use super::backoff::ReconnectPolicy;
use super::state::{CloseReason, ConnectionState};
use super::tasks::{
    heartbeat_loop, receive_loop, writer_loop, ChatSink, LinkEvent, WriterMsg, CLOSE_GRACE,
};

/// Runtime settings, usually built from `ClientConfig::link_settings`.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub url: Url,
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    /// Bound on transport open (credential checks excluded).
    pub connect_timeout: Duration,
    /// Minimum remaining credential lifetime accepted without a refresh.
    pub credential_threshold: Duration,
    pub reconnect: ReconnectPolicy,
}

impl LinkSettings {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            heartbeat_interval: Duration::from_secs(25),
            pong_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
            credential_threshold: Duration::from_secs(60),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

enum Command {
    Connect(SessionScope),
    Disconnect(oneshot::Sender<()>),
    Send(Envelope),
    Flush,
}

// --------------------
// Handle
// --------------------

/// Cheaply clonable handle to one managed connection.
///
/// Dropping the last handle stops the actor and closes the link.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    dispatcher: Arc<Dispatcher>,
    buffer: OutgoingBuffer<ChatMessage>,
    stats: Arc<LinkStats>,
}

impl ConnectionManager {
    /// Spawn the actor. Must be called inside a tokio runtime.
    pub fn new(
        settings: LinkSettings,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
        buffer: OutgoingBuffer<ChatMessage>,
    ) -> Self {
        let stats = Arc::new(LinkStats::default());
        let dispatcher = Arc::new(Dispatcher::new(stats.clone()));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);

        let actor = Actor {
            settings,
            transport,
            credentials,
            dispatcher: dispatcher.clone(),
            buffer: buffer.clone(),
            stats: stats.clone(),
            state: state_tx,
            events,
            scope: SessionScope::default(),
            epoch: 0,
            attempts: 0,
            pending: None,
            link: None,
        };
        tokio::spawn(actor.run(command_rx, event_rx));

        Self {
            commands,
            state,
            dispatcher,
            buffer,
            stats,
        }
    }

    /// Start connecting with `scope`. No-op while connected or connecting;
    /// during backoff the pending timer is skipped and a connect starts now.
    pub fn connect(&self, scope: SessionScope) {
        self.command(Command::Connect(scope));
    }

    /// Tear everything down and stay disconnected. Returns once the socket
    /// close has been attempted (bounded by a short grace period).
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Disconnect(tx));
        let _ = rx.await;
    }

    /// Queue a chat message for guaranteed delivery; flushes right away when
    /// connected.
    pub fn send(&self, msg: ChatMessage) {
        self.buffer.enqueue(msg);
        self.command(Command::Flush);
    }

    /// Send an envelope directly when connected. While offline, chat messages
    /// are buffered and everything else is dropped with a warning.
    ///
    /// Direct sends are not ordered relative to buffered ones.
    pub fn send_envelope(&self, event: EventType, order_id: Option<&str>, payload: Option<Bytes>) {
        let mut env = Envelope::new(event);
        env.order_id = order_id.map(str::to_owned);
        env.payload = payload.map(Payload::Json);
        self.command(Command::Send(env));
    }

    /// `send_envelope` with a typed payload. Encode failures are logged and
    /// the message is skipped.
    pub fn send_event<T: Serialize + ?Sized>(&self, event: EventType, order_id: Option<&str>, payload: &T) {
        match encode_payload(payload) {
            Ok(bytes) => self.send_envelope(event, order_id, Some(bytes)),
            Err(e) => tracing::warn!(%event, error = %e, "outgoing payload skipped"),
        }
    }

    pub fn accept_order(&self, order_id: &str, courier_id: i64) {
        let decision = CourierDecision {
            courier_id,
            accepted: true,
        };
        self.send_event(EventType::CourierAccepted, Some(order_id), &decision);
    }

    pub fn decline_order(&self, order_id: &str, courier_id: i64) {
        let decision = CourierDecision {
            courier_id,
            accepted: false,
        };
        self.send_event(EventType::CourierDeclined, Some(order_id), &decision);
    }

    pub fn cancel_order(&self, order_id: &str, reason: Option<&str>) {
        let payload = Cancellation {
            reason: reason.map(str::to_owned),
        };
        self.send_event(EventType::OrderCancelled, Some(order_id), &payload);
    }

    pub fn push_location(&self, order_id: &str, fix: LocationFix) {
        self.send_event(EventType::CourierLocation, Some(order_id), &fix);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn stats(&self) -> &Arc<LinkStats> {
        &self.stats
    }

    pub fn buffer(&self) -> &OutgoingBuffer<ChatMessage> {
        &self.buffer
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn on_open(&self, f: impl Fn() + Send + Sync + 'static) {
        self.dispatcher.set_on_open(Arc::new(f));
    }

    /// Called once per link loss, connect failure or terminal stop. The
    /// failure that spends the retry budget is reported only as
    /// `RetriesExhausted`. A manual `disconnect` is not reported.
    pub fn on_close(&self, f: impl Fn(CloseReason) + Send + Sync + 'static) {
        self.dispatcher.set_on_close(Arc::new(f));
    }

    pub fn on_order_offered(&self, f: impl Fn(OrderOffer) + Send + Sync + 'static) {
        self.dispatcher.on_order_offered(f);
    }

    pub fn on_order_assigned(&self, f: impl Fn(String, CourierModel) + Send + Sync + 'static) {
        self.dispatcher.on_order_assigned(f);
    }

    pub fn on_order_cancelled(&self, f: impl Fn(String, Option<String>) + Send + Sync + 'static) {
        self.dispatcher.on_order_cancelled(f);
    }

    pub fn on_order_updated(&self, f: impl Fn(OrderModel) + Send + Sync + 'static) {
        self.dispatcher.on_order_updated(f);
    }

    pub fn on_order_completed(&self, f: impl Fn(String) + Send + Sync + 'static) {
        self.dispatcher.on_order_completed(f);
    }

    pub fn on_courier_location(&self, f: impl Fn(String, LocationFix) + Send + Sync + 'static) {
        self.dispatcher.on_courier_location(f);
    }

    pub fn on_chat_message(&self, f: impl Fn(ChatMessage) + Send + Sync + 'static) {
        self.dispatcher.on_chat_message(f);
    }

    pub fn on_courier_accepted(&self, f: impl Fn(String, CourierModel) + Send + Sync + 'static) {
        self.dispatcher.on_courier_accepted(f);
    }

    pub fn on_courier_declined(&self, f: impl Fn(String, CourierModel) + Send + Sync + 'static) {
        self.dispatcher.on_courier_declined(f);
    }

    pub fn on_order_ack(&self, f: impl Fn(Option<String>, OrderAck) + Send + Sync + 'static) {
        self.dispatcher.on_order_ack(f);
    }

    pub fn on_heartbeat(&self, f: impl Fn() + Send + Sync + 'static) {
        self.dispatcher.on_heartbeat(f);
    }

    /// Raw access for callers that want the whole decoded event.
    pub fn on_event(&self, event: EventType, f: impl Fn(InboundEvent) + Send + Sync + 'static) {
        self.dispatcher.register(event, Arc::new(f));
    }

    fn command(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            tracing::error!("connection actor is gone");
        }
    }
}

// --------------------
// Actor
// --------------------

struct LiveLink {
    writer: mpsc::UnboundedSender<WriterMsg>,
    writer_task: JoinHandle<()>,
    receive_task: JoinHandle<()>,
    heartbeat_task: JoinHandle<()>,
}

struct Actor {
    settings: LinkSettings,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    dispatcher: Arc<Dispatcher>,
    buffer: OutgoingBuffer<ChatMessage>,
    stats: Arc<LinkStats>,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<LinkEvent>,
    scope: SessionScope,
    epoch: u64,
    attempts: u32,
    /// In-flight connect or reconnect timer.
    pending: Option<JoinHandle<()>>,
    link: Option<LiveLink>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => break,
                },
                Some(ev) = events.recv() => self.on_event(ev),
            }
        }

        self.abort_pending();
        if let Some(writer_task) = self.teardown_link() {
            let _ = tokio::time::timeout(CLOSE_GRACE, writer_task).await;
        }
        tracing::debug!("connection actor stopped");
    }

    fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(?prev, ?next, "connection state");
        }
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(scope) => {
                self.scope.merge(scope);
                match self.current() {
                    ConnectionState::Connected | ConnectionState::Connecting => {
                        tracing::debug!("connect ignored; already active");
                    }
                    ConnectionState::Disconnected | ConnectionState::Reconnecting { .. } => {
                        self.start_connect();
                    }
                }
            }
            Command::Disconnect(reply) => self.disconnect(reply),
            Command::Send(env) => self.send_direct(env),
            Command::Flush => self.spawn_flush(),
        }
    }

    fn on_event(&mut self, ev: LinkEvent) {
        match ev {
            LinkEvent::Opened {
                epoch,
                sink,
                stream,
            } => {
                if epoch != self.epoch {
                    tracing::debug!(epoch, current = self.epoch, "stale open discarded");
                    tokio::spawn(close_stale(sink));
                    return;
                }
                self.pending = None;
                self.link_up(sink, stream);
            }
            LinkEvent::ConnectFailed { epoch, error } => {
                if epoch != self.epoch {
                    return;
                }
                self.pending = None;
                if error.is_auth() {
                    self.auth_failed(error);
                } else {
                    tracing::warn!(error = %error, "connect failed");
                    self.link_down(CloseReason::from(error));
                }
            }
            LinkEvent::LinkLost { epoch, reason } => {
                if epoch != self.epoch || self.link.is_none() {
                    return;
                }
                tracing::warn!(%reason, "link lost");
                self.link_down(reason);
            }
            LinkEvent::ReconnectDue { epoch } => {
                if epoch != self.epoch {
                    return;
                }
                if let ConnectionState::Reconnecting { attempt, .. } = self.current() {
                    tracing::info!(attempt, "reconnecting");
                    self.start_connect();
                }
            }
        }
    }

    fn start_connect(&mut self) {
        self.abort_pending();
        self.epoch += 1;
        let epoch = self.epoch;
        self.set_state(ConnectionState::Connecting);

        let transport = self.transport.clone();
        let credentials = self.credentials.clone();
        let events = self.events.clone();
        let base = self.settings.url.clone();
        let scope = self.scope.clone();
        let threshold = self.settings.credential_threshold;
        let open_timeout = self.settings.connect_timeout;

        self.pending = Some(tokio::spawn(async move {
            let opened = open_link(
                transport.as_ref(),
                credentials.as_ref(),
                &base,
                &scope,
                threshold,
                open_timeout,
            )
            .await;
            let ev = match opened {
                Ok((sink, stream)) => LinkEvent::Opened {
                    epoch,
                    sink,
                    stream,
                },
                Err(error) => LinkEvent::ConnectFailed { epoch, error },
            };
            let _ = events.send(ev);
        }));
    }

    fn link_up(&mut self, sink: Box<dyn FrameSink>, stream: Box<dyn FrameStream>) {
        let epoch = self.epoch;
        let (writer, writer_rx) = mpsc::unbounded_channel();
        let (pong_tx, pong_rx) = mpsc::unbounded_channel();

        let writer_task = tokio::spawn(writer_loop(epoch, sink, writer_rx, self.events.clone()));
        let receive_task = tokio::spawn(receive_loop(
            epoch,
            stream,
            self.dispatcher.clone(),
            self.stats.clone(),
            pong_tx,
            self.events.clone(),
        ));
        let heartbeat_task = tokio::spawn(heartbeat_loop(
            epoch,
            self.settings.heartbeat_interval,
            self.settings.pong_timeout,
            writer.clone(),
            pong_rx,
            self.events.clone(),
        ));

        self.link = Some(LiveLink {
            writer,
            writer_task,
            receive_task,
            heartbeat_task,
        });
        self.attempts = 0;
        self.stats.connected();
        self.set_state(ConnectionState::Connected);
        tracing::info!(epoch, "link open");

        self.dispatcher.opened();
        self.spawn_flush();
    }

    /// Retriable loss: report the close and schedule a reconnect. When the
    /// budget is spent only the terminal close is reported.
    fn link_down(&mut self, reason: CloseReason) {
        self.teardown_link();
        self.set_state(ConnectionState::Disconnected);

        if self.attempts >= self.settings.reconnect.max_attempts {
            let attempts = self.attempts;
            self.attempts = 0;
            tracing::warn!(attempts, last = %reason, "reconnect budget spent; giving up");
            self.dispatcher.closed(CloseReason::RetriesExhausted { attempts });
            return;
        }

        self.dispatcher.closed(reason);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let policy = self.settings.reconnect;
        let attempt = self.attempts + 1;
        self.attempts = attempt;
        let delay = policy.delay_for(attempt);
        self.set_state(ConnectionState::Reconnecting {
            attempt,
            next_delay: delay,
        });
        self.stats.reconnect_scheduled();
        tracing::info!(attempt, ?delay, "reconnect scheduled");

        let epoch = self.epoch;
        let events = self.events.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(LinkEvent::ReconnectDue { epoch });
        }));
    }

    /// Auth failures are terminal for this attempt: no reconnect, one close.
    fn auth_failed(&mut self, error: LinkError) {
        self.teardown_link();
        self.attempts = 0;
        self.stats.auth_failure();
        self.set_state(ConnectionState::Disconnected);
        tracing::warn!(error = %error, "auth failed; not reconnecting");
        self.dispatcher.closed(CloseReason::from(error));
    }

    fn disconnect(&mut self, reply: oneshot::Sender<()>) {
        self.abort_pending();
        self.epoch += 1;
        self.attempts = 0;
        let writer_task = self.teardown_link();
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("disconnected by request");

        match writer_task {
            Some(task) => {
                tokio::spawn(async move {
                    let _ = tokio::time::timeout(CLOSE_GRACE, task).await;
                    let _ = reply.send(());
                });
            }
            None => {
                let _ = reply.send(());
            }
        }
    }

    fn abort_pending(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }

    /// Stop the receive and heartbeat tasks and ask the writer to close the
    /// socket. Returns the writer task so callers may wait for the close.
    fn teardown_link(&mut self) -> Option<JoinHandle<()>> {
        let link = self.link.take()?;
        link.receive_task.abort();
        link.heartbeat_task.abort();
        let _ = link.writer.send(WriterMsg::Close);
        Some(link.writer_task)
    }

    fn send_direct(&mut self, env: Envelope) {
        if let Some(link) = &self.link {
            match encode_envelope(&env) {
                Ok(text) => {
                    if link.writer.send(WriterMsg::Frame(Frame::Text(text), None)).is_ok() {
                        self.stats.envelope_sent();
                    }
                }
                Err(e) => tracing::warn!(event = %env.event, error = %e, "envelope skipped"),
            }
            return;
        }

        if env.event_type() == Some(EventType::ChatMessage) {
            match decode_payload::<ChatMessage>(&env) {
                Ok(msg) => {
                    tracing::debug!(identity = msg.identity(), "offline chat buffered");
                    self.buffer.enqueue(msg);
                    return;
                }
                Err(e) => tracing::warn!(error = %e, "offline chat payload unreadable"),
            }
        }

        self.stats.envelope_dropped();
        tracing::warn!(event = %env.event, "not connected; envelope dropped");
    }

    fn spawn_flush(&self) {
        let Some(link) = &self.link else {
            return;
        };
        let sink = Arc::new(ChatSink {
            writer: link.writer.clone(),
            stats: self.stats.clone(),
        });
        let buffer = self.buffer.clone();
        tokio::spawn(async move {
            match buffer.flush(sink).await {
                Ok(0) => {}
                Ok(sent) => tracing::debug!(sent, "buffer flushed"),
                Err(e) => tracing::warn!(error = %e, "buffer flush stopped; will retry on next flush"),
            }
        });
    }
}

/// Credential check, then transport open bounded by `open_timeout`.
async fn open_link(
    transport: &dyn Transport,
    credentials: &dyn CredentialProvider,
    base: &Url,
    scope: &SessionScope,
    threshold: Duration,
    open_timeout: Duration,
) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
    let bearer = ensure_credential(credentials, threshold).await?;
    let target = ConnectTarget::build(base, scope, bearer);
    tracing::debug!(url = %target.url, "opening link");
    match tokio::time::timeout(open_timeout, transport.open(&target)).await {
        Ok(res) => res,
        Err(_) => Err(LinkError::Timeout(format!(
            "open did not finish within {open_timeout:?}"
        ))),
    }
}

async fn close_stale(mut sink: Box<dyn FrameSink>) {
    let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn link_settings_defaults_match_protocol_timings() {
        let url = Url::parse("ws://localhost/ws").unwrap();
        let s = LinkSettings::new(url);
        assert_eq!(s.heartbeat_interval, Duration::from_secs(25));
        assert_eq!(s.pong_timeout, Duration::from_secs(10));
        assert_eq!(s.reconnect.max_attempts, 8);
    }
}
