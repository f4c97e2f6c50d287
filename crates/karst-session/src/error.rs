//! The unified error type surfaced by the whole driver.
//!
//! Lower layers keep their own error enums ([`ProtocolError`],
//! [`TransportError`]); everything a caller of the client can observe
//! converges on [`Error`]. Transport and protocol failures are
//! recovered internally by the reconnect machinery when auto-reconnect
//! is enabled — what reaches a caller is always tied to the one
//! operation that failed.

use std::time::Duration;

use karst_protocol::{ErrorCode, ProtocolError, ServerError};
use karst_transport::TransportError;

/// Convenience alias used across the driver.
pub type Result<T> = std::result::Result<T, Error>;

/// Any error a caller of the Karst client can observe.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No candidate node could be reached.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Authentication was rejected. Never retried automatically.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// One specific request exceeded its deadline. The connection
    /// itself is still usable.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The operation needs a ready connection and there is none.
    #[error("not connected")]
    NotConnected,

    /// The connection dropped while the operation was in flight.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A referenced room or resource does not exist.
    #[error("lookup failed: {0}")]
    Lookup(String),

    /// A typed error raised by the server for this request.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Encoding/decoding failed (includes corrupt frames).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A socket-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The client was closed and cannot be used again.
    #[error("client closed")]
    Closed,

    /// The caller misused the API (e.g. positional and named
    /// procedure arguments together).
    #[error("{0}")]
    Usage(String),
}

impl Error {
    /// `true` for errors that mean the physical connection went away
    /// under the caller (as opposed to a per-request failure).
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Error::ConnectionLost(_) | Error::NotConnected | Error::Closed
        )
    }

    /// `true` when the server rejected the credentials/token.
    pub fn is_auth(&self) -> bool {
        match self {
            Error::Auth(_) => true,
            Error::Server(err) => err.code == ErrorCode::Auth,
            _ => false,
        }
    }
}
