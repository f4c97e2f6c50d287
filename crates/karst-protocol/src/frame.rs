//! Frame layout and the incremental frame decoder.
//!
//! Every protocol message is one length-delimited frame:
//!
//! ```text
//! offset  size  field
//! 0       4     length  (u32, little-endian) — body length in bytes
//! 4       2     pid     (u16, little-endian) — request id
//! 6       1     tp      (u8)                 — message type
//! 7       1     check   (u8)                 — must equal tp ^ 0xFF
//! ```
//!
//! The `check` byte detects corruption and stream desynchronization: a
//! header that fails the check can only come from a broken or
//! misaligned byte stream, so the connection carrying it must be torn
//! down rather than resynchronized.
//!
//! Bytes arrive in arbitrary chunks. [`FrameDecoder`] buffers until a
//! full header is available, then until `length` body bytes are
//! available, then yields one [`Frame`] and resumes. A decoder serves
//! exactly one connection; a reconnect gets a fresh one.

use crate::{Proto, ProtocolError};

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// The pid for frames not correlated to any request (server-pushed
/// events). Receivers ignore it.
pub const NO_PID: u16 = 0;

/// One decoded frame: header fields plus the raw, undecoded body.
///
/// The type id is kept raw because an unknown-but-consistent type is
/// not a framing error — the dispatcher logs and skips it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Request id from the header.
    pub pid: u16,
    /// Raw message type id.
    pub tp: u8,
    /// Undecoded payload bytes (`length` of them).
    pub body: Vec<u8>,
}

impl Frame {
    /// The message type, when the id is a known one.
    pub fn proto(&self) -> Option<Proto> {
        Proto::from_u8(self.tp)
    }
}

/// Encodes one frame: header followed by the (already packed) body.
pub fn encode_frame(pid: u16, tp: Proto, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&pid.to_le_bytes());
    out.push(tp as u8);
    out.push(tp.check());
    out.extend_from_slice(body);
    out
}

/// Parsed header fields, held while the body is still arriving.
#[derive(Debug, Clone, Copy)]
struct Header {
    len: usize,
    pid: u16,
    tp: u8,
}

fn parse_header(buf: &[u8]) -> Result<Header, ProtocolError> {
    debug_assert!(buf.len() >= HEADER_LEN);
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let pid = u16::from_le_bytes([buf[4], buf[5]]);
    let tp = buf[6];
    let check = buf[7];
    if check != tp ^ 0xFF {
        return Err(ProtocolError::CorruptFrame(format!(
            "integrity marker mismatch: tp=0x{tp:02x} check=0x{check:02x}"
        )));
    }
    Ok(Header { len, pid, tp })
}

/// Incremental decoder turning a byte stream into frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    header: Option<Header>,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk of received bytes to the internal buffer.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Yields the next complete frame, `None` when more bytes are
    /// needed, or a fatal [`ProtocolError::CorruptFrame`].
    ///
    /// Call in a loop after each [`feed`](Self::feed) — one chunk may
    /// complete several frames.
    pub fn try_next(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.header.is_none() {
            if self.buf.len() < HEADER_LEN {
                return Ok(None);
            }
            self.header = Some(parse_header(&self.buf)?);
        }
        // Unwrap is safe: the branch above just filled it.
        let header = self.header.expect("header parsed above");
        let total = HEADER_LEN + header.len;
        if self.buf.len() < total {
            return Ok(None);
        }
        self.header = None;
        let body = self.buf[HEADER_LEN..total].to_vec();
        self.buf.drain(..total);
        Ok(Some(Frame {
            pid: header.pid,
            tp: header.tp,
            body,
        }))
    }
}
