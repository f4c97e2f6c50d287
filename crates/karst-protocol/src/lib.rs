//! Wire protocol for the Karst client.
//!
//! This crate defines what travels on the wire and how it is framed:
//!
//! - **Types** ([`Proto`], [`Value`]) — message-type ids and the
//!   self-describing payload value model.
//! - **Frames** ([`Frame`], [`FrameDecoder`], [`encode_frame`]) — the
//!   length-delimited header layout and incremental decoding.
//! - **Codec** ([`pack`], [`unpack`], [`unpack_body`]) — MessagePack
//!   payload encoding.
//! - **Errors** ([`ProtocolError`], [`ServerError`], [`ErrorCode`]) —
//!   framing failures and the server's error taxonomy.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and the
//! session engine (request correlation). It knows nothing about
//! sockets, pending requests, or rooms.
//!
//! ```text
//! Transport (bytes) → Protocol (Frame + Value) → Session (correlation)
//! ```

mod codec;
mod error;
mod faildump;
mod frame;
mod proto;
mod value;

pub use codec::{pack, unpack, unpack_body};
pub use error::{ErrorCode, ProtocolError, ServerError};
pub use faildump::set_fail_file;
pub use frame::{encode_frame, Frame, FrameDecoder, HEADER_LEN, NO_PID};
pub use proto::Proto;
pub use value::Value;
