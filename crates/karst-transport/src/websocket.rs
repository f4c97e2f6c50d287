//! Client-side WebSocket transport using `tokio-tungstenite`.
//!
//! Each binary WebSocket message carries one or more complete frames;
//! the session's decoder does not care about message boundaries either
//! way. The stream is split so the reader task consuming `recv` can
//! never starve a concurrent `send`.

use std::io;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;

use crate::{Connection, ConnectionId, TransportError};

type WsStream =
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

/// A client-side WebSocket connection to one Karst node.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer: String,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    /// Dials a `ws://` or `wss://` URI. A `wss://` scheme needs the
    /// `tls` feature; without it the handshake fails.
    pub async fn connect(uri: &str) -> Result<Self, TransportError> {
        let (ws, _response) =
            tokio_tungstenite::connect_async(uri).await.map_err(|e| {
                TransportError::ConnectFailed(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    e,
                ))
            })?;
        let (sink, stream) = ws.split();

        let id = ConnectionId::next();
        tracing::debug!(%id, uri, "websocket connection established");

        Ok(Self {
            id,
            peer: uri.to_owned(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }
}

impl Connection for WebSocketConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let msg = Message::Binary(data.to_vec().into());
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(io::Error::new(
                io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            let msg = self.stream.lock().await.next().await;
            match msg {
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(data.into()));
                }
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::RecvFailed(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(io::Error::new(
                io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    fn peer_addr(&self) -> String {
        self.peer.clone()
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Helper: accepts one WebSocket connection and echoes binary
    /// messages back until the client closes.
    async fn spawn_echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Binary(_) | Message::Text(_) => {
                        ws.send(msg).await.unwrap();
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn test_websocket_send_and_recv() {
        let uri = spawn_echo_server().await;
        let conn = WebSocketConnection::connect(&uri)
            .await
            .expect("should connect");

        conn.send(b"ping me").await.expect("send should succeed");
        let chunk = conn.recv().await.unwrap().expect("should have data");
        assert_eq!(chunk, b"ping me");
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_after_close() {
        let uri = spawn_echo_server().await;
        let conn = WebSocketConnection::connect(&uri).await.unwrap();

        conn.close().await.expect("close should succeed");
        let chunk = conn.recv().await.expect("recv should not error");
        assert!(chunk.is_none(), "should return None after close");
    }

    #[tokio::test]
    async fn test_websocket_connect_refused_is_error() {
        let result = WebSocketConnection::connect("ws://127.0.0.1:1").await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    }
}
