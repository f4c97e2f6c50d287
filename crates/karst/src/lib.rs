//! # Karst
//!
//! Async Rust client driver for the Karst graph/object database.
//!
//! One [`Client`] holds one logical connection that may span many
//! physical sockets and candidate nodes: the driver frames and
//! serializes requests, correlates responses under concurrency,
//! reconnects with backoff and failover, and re-establishes room
//! (pub-sub) membership after every reconnect.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use karst::{Client, Room};
//!
//! # async fn demo() -> karst::Result<()> {
//! let client = Client::new();
//! client.connect("db0.local", 9220).await?;
//! client.authenticate(("admin", "pass")).await?;
//!
//! let two = client.query("1 + 1;").exec().await?;
//! assert_eq!(two.as_int(), Some(2));
//!
//! let room = Room::builder(".chat.id();")
//!     .scope("@:chat")
//!     .on_event("msg", |args| println!("chat: {args:?}"))
//!     .build();
//! room.join(&client, None).await?;
//! # Ok(()) }
//! ```

mod client;
mod config;

pub use client::{Client, QueryRequest, RunRequest};
pub use config::ClientConfig;

pub use karst_protocol::{
    set_fail_file, ErrorCode, Proto, ProtocolError, ServerError, Value,
};
pub use karst_room::{Driver, Room, RoomBuilder, RoomRef, RoomState};
pub use karst_session::{Auth, ConnState, Error, Result};
pub use karst_transport::{Node, TransportError, DEFAULT_PORT};

/// The common imports in one place.
pub mod prelude {
    pub use crate::{
        Auth, Client, ClientConfig, ConnState, Error, Node, Result, Room,
        RoomState, Value,
    };
}
