//! Payload encoding and decoding.
//!
//! Payloads are MessagePack (via `rmp-serde`): compact, binary, and
//! self-describing, so arbitrary nested values round-trip without a
//! schema. The frame layer treats the encoded payload as an opaque
//! byte string.

use serde::Serialize;

use crate::{faildump, ProtocolError, Value};

/// Encodes a value into MessagePack bytes.
pub fn pack<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    rmp_serde::to_vec(value).map_err(ProtocolError::Encode)
}

/// Decodes MessagePack bytes into a [`Value`].
pub fn unpack(data: &[u8]) -> Result<Value, ProtocolError> {
    rmp_serde::from_slice(data).map_err(ProtocolError::Decode)
}

/// Decodes a payload body; on failure, dumps the body to the
/// configured fail file (see [`crate::set_fail_file`]) before
/// returning the error.
///
/// An empty body decodes to [`Value::Nil`] — success replies carry no
/// payload at all.
pub fn unpack_body(body: &[u8]) -> Result<Value, ProtocolError> {
    if body.is_empty() {
        return Ok(Value::Nil);
    }
    unpack(body).inspect_err(|_| faildump::dump(body))
}
