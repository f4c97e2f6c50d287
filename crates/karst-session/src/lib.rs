//! Session engine for the Karst client.
//!
//! This crate owns everything between the raw socket and the public
//! client API for a single logical connection:
//!
//! - **Correlator** ([`Correlator`]) — the pending-request table that
//!   matches responses to callers and fails them on disconnect.
//! - **Conn** ([`Conn`], [`Event`]) — one physical connection: reader
//!   task, serialized writes, single teardown path.
//! - **Lifecycle** ([`Lifecycle`], [`ConnState`]) — the awaitable
//!   connection state machine.
//! - **Auth** ([`Auth`]) — credentials and their wire payload.
//! - **Error** ([`Error`]) — the unified error type callers see.

mod auth;
mod conn;
mod correlator;
mod error;
mod lifecycle;

pub use auth::Auth;
pub use conn::{Conn, Event, EventTx, LostHook};
pub use correlator::{Correlator, ReplyRx};
pub use error::{Error, Result};
pub use lifecycle::{ConnState, Lifecycle};
