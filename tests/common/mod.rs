//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use live_channel::channel::{ChannelManager, ConnectionState};

/// A request as seen by the mock backend.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Start a programmable HTTP backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(MockRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut socket).await else {
                            return;
                        };
                        let (status, body) = f(request).await;
                        let status_text = match status {
                            200 => "200 OK",
                            204 => "204 No Content",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn read_request(socket: &mut TcpStream) -> Option<MockRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut request_line = head.lines().next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
    Some(MockRequest { method, path, body })
}

/// Server side of one accepted WebSocket connection. Dropping it closes the socket.
pub struct WsPeer {
    outgoing: mpsc::UnboundedSender<String>,
    incoming: mpsc::UnboundedReceiver<String>,
}

impl WsPeer {
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.outgoing.send(text.into());
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }
}

/// Start a WebSocket server on an ephemeral port.
///
/// While `accepting` is false, connections are dropped before the handshake.
pub async fn start_ws_server(
    accepting: Arc<std::sync::atomic::AtomicBool>,
) -> (SocketAddr, mpsc::UnboundedReceiver<WsPeer>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (peers_tx, peers_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            if !accepting.load(std::sync::atomic::Ordering::SeqCst) {
                drop(socket);
                continue;
            }
            let Ok(ws) = tokio_tungstenite::accept_async(socket).await else {
                continue;
            };

            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
            if peers_tx.send(WsPeer { outgoing: out_tx, incoming: in_rx }).is_err() {
                break;
            }

            tokio::spawn(async move {
                let (mut sink, mut stream) = ws.split();
                loop {
                    tokio::select! {
                        outgoing = out_rx.recv() => match outgoing {
                            Some(text) => {
                                if sink.send(Message::text(text)).await.is_err() {
                                    break;
                                }
                            }
                            None => {
                                let _ = sink.close().await;
                                break;
                            }
                        },
                        incoming = stream.next() => match incoming {
                            Some(Ok(Message::Text(text))) => {
                                let _ = in_tx.send(text.as_str().to_string());
                            }
                            Some(Ok(_)) => {}
                            _ => break,
                        },
                    }
                }
            });
        }
    });

    (addr, peers_rx)
}

/// Wait until the channel reports `state`, panicking after `limit`.
pub async fn wait_for_state(manager: &ChannelManager, state: ConnectionState, limit: Duration) {
    let mut status = manager.watch_status();
    let reached = matches!(
        tokio::time::timeout(limit, status.wait_for(|s| s.state == state)).await,
        Ok(Ok(_))
    );
    assert!(
        reached,
        "channel never reached {} (currently {})",
        state,
        manager.state()
    );
}
