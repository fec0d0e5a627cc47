//! Scripted in-memory transport shared by integration tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use courierlink_client::transport::{ConnectTarget, Frame, FrameSink, FrameStream, Transport};
use courierlink_core::error::{LinkError, Result};

/// What the next `open` does.
#[derive(Debug, Clone)]
pub enum Open {
    Accept,
    Fail(LinkError),
}

/// Server side of one accepted connection.
pub struct ServerEnd {
    pub target: ConnectTarget,
    /// Frames the client wrote.
    pub from_client: mpsc::UnboundedReceiver<Frame>,
    /// Push frames (or read errors) to the client. Dropping it ends the
    /// client's stream unless auto-pong keeps a clone alive.
    pub to_client: mpsc::UnboundedSender<Result<Frame>>,
}

impl ServerEnd {
    pub fn push_text(&self, text: &str) {
        self.to_client.send(Ok(Frame::Text(text.to_string()))).unwrap();
    }

    /// Next non-control frame written by the client.
    pub async fn next_text(&mut self) -> String {
        loop {
            match self.from_client.recv().await.expect("client side closed") {
                Frame::Text(t) => return t,
                Frame::Ping(_) | Frame::Pong(_) => continue,
                other => panic!("unexpected frame {other:?}"),
            }
        }
    }
}

pub struct MockTransport {
    script: Mutex<VecDeque<Open>>,
    /// Used once the script runs out.
    fallback: Open,
    auto_pong: bool,
    opens: AtomicUsize,
    servers: mpsc::UnboundedSender<ServerEnd>,
}

impl MockTransport {
    pub fn new(script: Vec<Open>, fallback: Open, auto_pong: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let t = Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            auto_pong,
            opens: AtomicUsize::new(0),
            servers,
        });
        (t, rx)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, target: &ConnectTarget) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        if let Open::Fail(e) = step {
            return Err(e);
        }

        let (client_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();
        let sink = MockSink {
            tx: client_tx,
            pong: self.auto_pong.then(|| to_client.clone()),
        };
        let _ = self.servers.send(ServerEnd {
            target: target.clone(),
            from_client,
            to_client,
        });
        Ok((Box::new(sink), Box::new(MockStream { rx: client_rx })))
    }
}

struct MockSink {
    tx: mpsc::UnboundedSender<Frame>,
    pong: Option<mpsc::UnboundedSender<Result<Frame>>>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        if let (Frame::Ping(p), Some(pong)) = (&frame, &self.pong) {
            let _ = pong.send(Ok(Frame::Pong(p.clone())));
        }
        self.tx
            .send(frame)
            .map_err(|_| LinkError::Transport("server end dropped".into()))
    }

    async fn close(&mut self) -> Result<()> {
        let _ = self.tx.send(Frame::Close);
        Ok(())
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<Result<Frame>>,
}

#[async_trait]
impl FrameStream for MockStream {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        self.rx.recv().await
    }
}
