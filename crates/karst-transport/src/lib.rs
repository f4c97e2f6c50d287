//! Transport abstraction layer for the Karst client.
//!
//! Provides the [`Connection`] trait that abstracts over the socket
//! kinds a Karst node can be reached through (plain TCP, TLS-wrapped
//! TCP, WebSocket), the [`Node`] address type, and the [`Socket`]
//! enum used by the session engine to hold whichever kind was dialed.
//!
//! # Feature Flags
//!
//! - `websocket` (default) — WebSocket transport via `tokio-tungstenite`
//! - `tls` — encrypted channels via `tokio-rustls` (and the rustls
//!   backend for `wss://`)

#![allow(async_fn_in_trait)]

mod error;
mod tcp;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use tcp::TcpConnection;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default client port of a Karst node.
pub const DEFAULT_PORT: u16 = 9220;

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next process-unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Node addresses
// ---------------------------------------------------------------------------

/// The address of one candidate Karst node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A plain `host:port` endpoint (TCP, optionally TLS-wrapped).
    Tcp { host: String, port: u16 },
    /// A `ws://` or `wss://` endpoint.
    Ws { uri: String },
}

impl Node {
    /// A TCP endpoint.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// A WebSocket endpoint from a full URI.
    pub fn ws(uri: impl Into<String>) -> Self {
        Self::Ws { uri: uri.into() }
    }
}

impl std::str::FromStr for Node {
    type Err = TransportError;

    /// Parses `"ws://…"`, `"wss://…"`, `"host:port"` or a bare
    /// hostname (which gets [`DEFAULT_PORT`]).
    fn from_str(s: &str) -> Result<Self, TransportError> {
        if s.starts_with("ws://") || s.starts_with("wss://") {
            return Ok(Node::ws(s));
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port: u16 = port
                    .parse()
                    .map_err(|_| TransportError::InvalidAddress(s.to_owned()))?;
                Ok(Node::tcp(host, port))
            }
            Some(_) => Err(TransportError::InvalidAddress(s.to_owned())),
            None if !s.is_empty() => Ok(Node::tcp(s, DEFAULT_PORT)),
            None => Err(TransportError::InvalidAddress(s.to_owned())),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Tcp { host, port } => write!(f, "{host}:{port}"),
            Node::Ws { uri } => write!(f, "{uri}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Connection trait
// ---------------------------------------------------------------------------

/// A single bidirectional connection that can send and receive bytes.
///
/// One writer at a time: callers serialize `send` externally (the
/// session engine holds a lock across each frame write). `recv` is
/// only ever called by the connection's single reader task.
pub trait Connection: Send + Sync + 'static {
    /// Sends data to the node.
    fn send(&self, data: &[u8]) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next chunk of bytes from the node.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed. A
    /// chunk carries no framing guarantees; the caller reassembles
    /// frames.
    fn recv(&self) -> impl std::future::Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the connection. Returns immediately; the reader observes
    /// EOF as a consequence.
    fn close(&self) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// The remote address, for diagnostics (`"host:port"`).
    fn peer_addr(&self) -> String;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

// ---------------------------------------------------------------------------
// Socket — whichever kind was dialed
// ---------------------------------------------------------------------------

/// One dialed socket of any supported kind.
pub enum Socket {
    /// Plain or TLS-wrapped TCP.
    Tcp(TcpConnection),
    /// WebSocket.
    #[cfg(feature = "websocket")]
    Ws(WebSocketConnection),
}

impl Socket {
    /// Dials `node`, optionally wrapping TCP in TLS, bounded by
    /// `timeout`.
    ///
    /// For WebSocket nodes the URI scheme decides encryption (`wss://`
    /// requires the `tls` feature); `secure` applies to TCP nodes.
    pub async fn connect(
        node: &Node,
        secure: bool,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let dial = async {
            match node {
                Node::Tcp { host, port } => {
                    TcpConnection::connect(host, *port, secure).await.map(Socket::Tcp)
                }
                #[cfg(feature = "websocket")]
                Node::Ws { uri } => {
                    WebSocketConnection::connect(uri).await.map(Socket::Ws)
                }
                #[cfg(not(feature = "websocket"))]
                Node::Ws { uri } => Err(TransportError::InvalidAddress(format!(
                    "websocket support not compiled in: {uri}"
                ))),
            }
        };
        match tokio::time::timeout(timeout, dial).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectFailed(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {node} timed out"),
            ))),
        }
    }
}

impl Connection for Socket {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        match self {
            Socket::Tcp(c) => c.send(data).await,
            #[cfg(feature = "websocket")]
            Socket::Ws(c) => c.send(data).await,
        }
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        match self {
            Socket::Tcp(c) => c.recv().await,
            #[cfg(feature = "websocket")]
            Socket::Ws(c) => c.recv().await,
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        match self {
            Socket::Tcp(c) => c.close().await,
            #[cfg(feature = "websocket")]
            Socket::Ws(c) => c.close().await,
        }
    }

    fn peer_addr(&self) -> String {
        match self {
            Socket::Tcp(c) => c.peer_addr(),
            #[cfg(feature = "websocket")]
            Socket::Ws(c) => c.peer_addr(),
        }
    }

    fn id(&self) -> ConnectionId {
        match self {
            Socket::Tcp(c) => c.id(),
            #[cfg(feature = "websocket")]
            Socket::Ws(c) => c.id(),
        }
    }
}
