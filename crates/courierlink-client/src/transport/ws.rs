//! WebSocket transport over `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::Error as WsError;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use courierlink_core::error::{LinkError, Result};

use super::codec::{from_message, to_message, transport_err};
use super::{ConnectTarget, Frame, FrameSink, FrameStream, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The open itself is unbounded here; the connection manager applies its
/// connect timeout around `open`.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, target: &ConnectTarget) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
        let mut request = target
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| transport_err("build upgrade request", e))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", target.bearer))
            .map_err(|e| LinkError::AuthFailed(format!("credential is not a valid header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let stream = match connect_async(request).await {
            Ok((stream, _)) => stream,
            Err(WsError::Http(response)) => {
                let status = response.status().as_u16();
                return Err(match status {
                    401 | 403 => LinkError::AuthFailed(format!("upgrade rejected with {status}")),
                    code => LinkError::Transport(format!("upgrade failed with http {code}")),
                });
            }
            Err(e) => return Err(transport_err("connect", e)),
        };

        tracing::debug!(url = %target.url, "websocket open");
        let (tx, rx) = stream.split();
        Ok((Box::new(WsSink(tx)), Box::new(WsSource(rx))))
    }
}

struct WsSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.0
            .send(to_message(frame))
            .await
            .map_err(|e| transport_err("send", e))
    }

    async fn close(&mut self) -> Result<()> {
        // The peer may already be gone; a failed close frame is not an error.
        let _ = self.0.send(to_message(Frame::Close)).await;
        self.0.close().await.map_err(|e| transport_err("close", e))
    }
}

struct WsSource(SplitStream<WsStream>);

#[async_trait]
impl FrameStream for WsSource {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        loop {
            match self.0.next().await? {
                Ok(msg) => {
                    if let Some(frame) = from_message(msg) {
                        return Some(Ok(frame));
                    }
                }
                Err(e) => return Some(Err(transport_err("read", e))),
            }
        }
    }
}
