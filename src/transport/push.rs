//! WebSocket push transport.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::TransportError;
use crate::resilience::timeouts::with_timeout;
use crate::transport::{InboundFrame, OutboundFrame, PushSession, PushSink, PushStream, PushTransport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens `tokio-tungstenite` client sessions against one URL.
#[derive(Debug, Clone)]
pub struct WsPushTransport {
    url: Url,
    send_timeout: Duration,
}

impl WsPushTransport {
    pub fn new(url: &str, send_timeout: Duration) -> Result<Self, TransportError> {
        let url = Url::parse(url)
            .map_err(|e| TransportError::Connect(format!("invalid push URL '{}': {}", url, e)))?;
        Ok(Self { url, send_timeout })
    }
}

#[async_trait]
impl PushTransport for WsPushTransport {
    async fn connect(&self) -> Result<PushSession, TransportError> {
        let (ws, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(url = %self.url, status = %response.status(), "WebSocket handshake complete");

        let (sink, stream) = ws.split();
        Ok(PushSession {
            sink: std::sync::Arc::new(WsSink {
                inner: Mutex::new(sink),
                timeout: self.send_timeout,
            }),
            stream: Box::new(WsReader { inner: stream }),
        })
    }

    fn endpoint(&self) -> String {
        self.url.to_string()
    }
}

struct WsSink {
    inner: Mutex<SplitSink<WsStream, Message>>,
    timeout: Duration,
}

#[async_trait]
impl PushSink for WsSink {
    async fn send(&self, frame: &OutboundFrame) -> Result<(), TransportError> {
        let text = serde_json::to_string(frame).map_err(|e| TransportError::Send(e.to_string()))?;
        with_timeout(self.timeout, async {
            self.inner
                .lock()
                .await
                .send(Message::text(text))
                .await
                .map_err(|e| TransportError::Send(e.to_string()))
        })
        .await
    }

    async fn close(&self) {
        if let Err(e) = self.inner.lock().await.close().await {
            tracing::debug!(error = %e, "WebSocket close failed");
        }
    }
}

struct WsReader {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl PushStream for WsReader {
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(TransportError::Closed(e.to_string()))),
            };

            let parsed = match &message {
                Message::Text(text) => serde_json::from_str::<InboundFrame>(text.as_str()),
                Message::Binary(bytes) => serde_json::from_slice::<InboundFrame>(bytes),
                Message::Close(frame) => {
                    tracing::debug!(frame = ?frame, "Peer closed WebSocket");
                    return None;
                }
                // ping/pong are answered by tungstenite
                _ => continue,
            };

            match parsed {
                Ok(frame) => return Some(Ok(frame)),
                Err(e) => tracing::warn!(error = %e, "Skipping malformed push frame"),
            }
        }
    }
}
