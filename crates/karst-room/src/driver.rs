//! The collaborator seam between rooms and the client.
//!
//! Rooms never touch sockets or frames; everything they need from the
//! core is this trait, implemented by the client. Higher-level add-ons
//! observe the core through the same contract.

use std::collections::BTreeMap;
use std::sync::Arc;

use karst_protocol::Value;
use karst_session::Result;

use crate::RoomRegistry;

/// What the room subsystem requires from the connection core.
pub trait Driver: Send + Sync {
    /// The scope used when a room was built without one.
    fn default_scope(&self) -> String;

    /// `true` while a socket is up.
    fn is_connected(&self) -> bool;

    /// The room registry this driver dispatches events through.
    fn rooms(&self) -> Arc<RoomRegistry>;

    /// Runs code in a scope and returns its value.
    async fn query_raw(
        &self,
        scope: &str,
        code: &str,
        vars: Option<BTreeMap<String, Value>>,
    ) -> Result<Value>;

    /// Joins rooms by id; the reply mirrors `ids`, with `None` for
    /// every id the server does not know.
    async fn join_rooms(
        &self,
        scope: &str,
        ids: &[u64],
    ) -> Result<Vec<Option<u64>>>;

    /// Leaves rooms by id; same reply contract as [`Self::join_rooms`].
    async fn leave_rooms(
        &self,
        scope: &str,
        ids: &[u64],
    ) -> Result<Vec<Option<u64>>>;

    /// Emits a fire-and-forget event to a room.
    async fn emit_event(
        &self,
        scope: &str,
        room_id: u64,
        event: &str,
        args: &[Value],
    ) -> Result<()>;
}
