//! Room (pub-sub) subsystem for the Karst client.
//!
//! A **room** is a server-side channel identified by an integer id
//! within a scope. This crate provides:
//!
//! - [`Room`] / [`RoomBuilder`] — the handle application code builds,
//!   with named event handlers and lifecycle hooks.
//! - [`RoomRegistry`] — the (scope, id)-keyed table the client routes
//!   pushed events through, and the source of the rejoin set after a
//!   reconnect.
//! - [`Driver`] — the seam to the connection core; rooms observe the
//!   client only through this trait.

#![allow(async_fn_in_trait)]

mod driver;
mod registry;
mod room;

pub use driver::Driver;
pub use registry::{RoomRegistry, RoomSignal, RoomTx};
pub use room::{AnyEventHandler, EventHandler, Room, RoomBuilder, RoomRef, RoomState};
