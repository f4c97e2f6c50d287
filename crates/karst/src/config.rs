//! Client configuration.

use std::time::Duration;

/// Configuration for a [`Client`](crate::Client).
///
/// The defaults match a typical single-node development setup; create
/// one with `ClientConfig::default()` and override the fields you care
/// about.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Reconnect automatically when the connection drops or a node
    /// announces it is shutting down. When disabled, a drop leaves the
    /// client `Disconnected` until an explicit `reconnect()`.
    ///
    /// Default: `true`.
    pub auto_reconnect: bool,

    /// Wrap TCP sockets in TLS before any protocol bytes are
    /// exchanged (requires the `tls` feature). WebSocket nodes are
    /// governed by their URI scheme instead.
    ///
    /// Default: `false`.
    pub secure: bool,

    /// The scope used by every request that does not name one.
    /// Changeable at runtime via `set_default_scope`.
    ///
    /// Default: `"@k"`.
    pub default_scope: String,

    /// Time limit for the initial dial of a node.
    ///
    /// Default: 5 seconds.
    pub connect_timeout: Duration,

    /// Time limit for authentication round-trips.
    ///
    /// Default: 5 seconds.
    pub auth_timeout: Duration,

    /// Cap on the backoff between reconnect sweeps over the node pool.
    ///
    /// Default: 60 seconds.
    pub max_reconnect_wait: Duration,

    /// Cap on the growing per-node dial timeout used while
    /// reconnecting.
    ///
    /// Default: 10 seconds.
    pub max_connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            secure: false,
            default_scope: "@k".to_owned(),
            connect_timeout: Duration::from_secs(5),
            auth_timeout: Duration::from_secs(5),
            max_reconnect_wait: Duration::from_secs(60),
            max_connect_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.auto_reconnect);
        assert!(!config.secure);
        assert_eq!(config.default_scope, "@k");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.max_reconnect_wait, Duration::from_secs(60));
    }
}
