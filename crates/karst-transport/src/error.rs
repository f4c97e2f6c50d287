/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Establishing the connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    RecvFailed(#[source] std::io::Error),

    /// The node address could not be parsed.
    #[error("invalid node address `{0}`")]
    InvalidAddress(String),

    /// An encrypted channel was requested but is not available.
    #[error("tls error: {0}")]
    Tls(String),
}
