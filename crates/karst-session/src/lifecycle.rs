//! The connection lifecycle state machine.
//!
//! One logical client connection moves through these states, possibly
//! spanning many physical sockets:
//!
//! ```text
//!              connect            socket up           auth ok
//! Disconnected ───────→ Connecting ───────→ Connected ───────→ Ready
//!      ↑                    ↑                   │ (via Authenticating)
//!      │ (auto-reconnect    │ retry w/ backoff  │
//!      │  disabled)         │                   │ socket lost /
//!      └────────────── Reconnecting ←───────────┘ shutdown notice
//!
//! Closing ───────→ Closed (terminal)
//! ```
//!
//! The state is published on a `watch` channel so any caller can await
//! a transition (`wait_ready`, `wait_closed`) without polling.
//! Transitions themselves are serialized by the owning client; this
//! type only enforces that `Closed` is terminal.

use std::fmt;

use tokio::sync::watch;

use crate::{Error, Result};

/// The lifecycle state of the logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No socket, and nobody is trying to change that.
    Disconnected,
    /// Dialing a candidate node.
    Connecting,
    /// Socket established, not yet authenticated.
    Connected,
    /// Auth request in flight.
    Authenticating,
    /// Authenticated; requests are accepted.
    Ready,
    /// Socket lost; the reconnect loop is running.
    Reconnecting,
    /// Explicit close in progress.
    Closing,
    /// Fully closed. Terminal: a closed client is not reusable.
    Closed,
}

impl ConnState {
    /// `true` when requests may be submitted.
    pub fn is_ready(self) -> bool {
        matches!(self, ConnState::Ready)
    }

    /// `true` for the terminal state.
    pub fn is_closed(self) -> bool {
        matches!(self, ConnState::Closed)
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnState::Disconnected => "disconnected",
            ConnState::Connecting => "connecting",
            ConnState::Connected => "connected",
            ConnState::Authenticating => "authenticating",
            ConnState::Ready => "ready",
            ConnState::Reconnecting => "reconnecting",
            ConnState::Closing => "closing",
            ConnState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Shared, awaitable lifecycle state.
pub struct Lifecycle {
    tx: watch::Sender<ConnState>,
}

impl Lifecycle {
    /// Starts in [`ConnState::Disconnected`].
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnState::Disconnected);
        Self { tx }
    }

    /// The current state.
    pub fn state(&self) -> ConnState {
        *self.tx.borrow()
    }

    /// Moves to `next`, unless already closed (`Closed` is terminal).
    /// Returns the state actually in effect afterwards.
    pub fn set(&self, next: ConnState) -> ConnState {
        let mut effective = next;
        self.tx.send_modify(|state| {
            if state.is_closed() {
                tracing::warn!(%next, "ignoring transition on closed connection");
                effective = ConnState::Closed;
            } else if *state != next {
                tracing::debug!(from = %state, to = %next, "connection state");
                *state = next;
            }
        });
        effective
    }

    /// A receiver for awaiting state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnState> {
        self.tx.subscribe()
    }

    /// Waits until the connection is [`ConnState::Ready`].
    ///
    /// Fails with [`Error::Closed`] if the connection closes first —
    /// a closed connection will never become ready again.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.subscribe();
        let state = rx
            .wait_for(|s| s.is_ready() || s.is_closed())
            .await
            .map_err(|_| Error::Closed)?;
        if state.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Waits until the connection reaches [`ConnState::Closed`].
    pub async fn wait_closed(&self) {
        let mut rx = self.subscribe();
        // An error means the sender is gone, which only happens when
        // the client itself was dropped; either way, it is over.
        let _ = rx.wait_for(|s| s.is_closed()).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
