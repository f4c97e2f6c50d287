//! Protocol-layer errors and the server's error-code taxonomy.

use std::fmt;

use crate::Value;

/// Errors raised while encoding or decoding wire data.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization of a payload failed.
    #[error("encode failed: {0}")]
    Encode(#[source] rmp_serde::encode::Error),

    /// A payload body could not be decoded.
    #[error("decode failed: {0}")]
    Decode(#[source] rmp_serde::decode::Error),

    /// A frame header failed its integrity check. Fatal for the
    /// connection that produced it.
    #[error("corrupt frame: {0}")]
    CorruptFrame(String),
}

// ---------------------------------------------------------------------------
// Server error taxonomy
// ---------------------------------------------------------------------------

/// A server-defined error code.
///
/// Operational errors occupy −64..−50, internal errors −6..−1, and
/// anything else is a custom code raised by user code on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Cancelled,
    Operation,
    NumArguments,
    Type,
    Value,
    Overflow,
    ZeroDiv,
    MaxQuota,
    Auth,
    Forbidden,
    Lookup,
    BadData,
    Syntax,
    Node,
    Assertion,
    ResultTooLarge,
    RequestTimeout,
    RequestCancel,
    Write,
    Memory,
    Internal,
    /// A code outside the built-in ranges.
    Custom(i64),
}

impl ErrorCode {
    /// Maps a raw wire code onto the taxonomy.
    pub fn from_raw(code: i64) -> Self {
        match code {
            -64 => Self::Cancelled,
            -63 => Self::Operation,
            -62 => Self::NumArguments,
            -61 => Self::Type,
            -60 => Self::Value,
            -59 => Self::Overflow,
            -58 => Self::ZeroDiv,
            -57 => Self::MaxQuota,
            -56 => Self::Auth,
            -55 => Self::Forbidden,
            -54 => Self::Lookup,
            -53 => Self::BadData,
            -52 => Self::Syntax,
            -51 => Self::Node,
            -50 => Self::Assertion,
            -6 => Self::ResultTooLarge,
            -5 => Self::RequestTimeout,
            -4 => Self::RequestCancel,
            -3 => Self::Write,
            -2 => Self::Memory,
            -1 => Self::Internal,
            other => Self::Custom(other),
        }
    }

    /// The raw wire code.
    pub fn raw(self) -> i64 {
        match self {
            Self::Cancelled => -64,
            Self::Operation => -63,
            Self::NumArguments => -62,
            Self::Type => -61,
            Self::Value => -60,
            Self::Overflow => -59,
            Self::ZeroDiv => -58,
            Self::MaxQuota => -57,
            Self::Auth => -56,
            Self::Forbidden => -55,
            Self::Lookup => -54,
            Self::BadData => -53,
            Self::Syntax => -52,
            Self::Node => -51,
            Self::Assertion => -50,
            Self::ResultTooLarge => -6,
            Self::RequestTimeout => -5,
            Self::RequestCancel => -4,
            Self::Write => -3,
            Self::Memory => -2,
            Self::Internal => -1,
            Self::Custom(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(code) => write!(f, "custom({code})"),
            other => write!(f, "{other:?}({})", other.raw()),
        }
    }
}

/// A typed error returned by the server for one specific request.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} [{code}]")]
pub struct ServerError {
    /// The decoded error code.
    pub code: ErrorCode,
    /// The human-readable message sent by the server.
    pub message: String,
}

impl ServerError {
    /// Builds a `ServerError` from a decoded `ResError` body
    /// (`{error_code, error_msg}`).
    ///
    /// A malformed body still produces a `ServerError` (internal code,
    /// the raw value as message) so the caller always sees the failure.
    pub fn from_body(body: &Value) -> Self {
        let code = body.get("error_code").and_then(Value::as_int);
        let message = body.get("error_msg").and_then(Value::as_str);
        match (code, message) {
            (Some(code), Some(message)) => Self {
                code: ErrorCode::from_raw(code),
                message: message.to_owned(),
            },
            _ => Self {
                code: ErrorCode::Internal,
                message: format!("malformed error payload: {body}"),
            },
        }
    }
}
