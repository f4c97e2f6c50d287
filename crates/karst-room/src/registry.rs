//! The room registry: routes server-pushed events to room tasks.
//!
//! Entries are keyed by (scope, room id) — never by `Room` instance
//! identity, so two local objects bound to the same server-side room
//! collapse onto one delivery target (the most recently joined wins).
//! Pushed events carry only the room id, so routing matches on the id
//! alone; the scope half of the key exists for membership bookkeeping
//! and the per-scope rejoin pass after a reconnect.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use karst_session::Event;
use tokio::sync::mpsc;

/// What a room's dispatch task receives.
#[derive(Debug)]
pub enum RoomSignal {
    /// A server-pushed room event (join, leave, emit, delete).
    Push(Event),
    /// The connection dropped; the room is no longer joined.
    Suspended,
}

/// Sender half of a room's signal channel.
pub type RoomTx = mpsc::UnboundedSender<RoomSignal>;

/// The per-client registry of joined rooms.
#[derive(Default)]
pub struct RoomRegistry {
    routes: Mutex<HashMap<(String, u64), RoomTx>>,
}

impl RoomRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the delivery target for (scope, id).
    pub fn bind(&self, scope: &str, id: u64, tx: RoomTx) {
        let mut routes = self.routes.lock().expect("registry lock poisoned");
        if routes.insert((scope.to_owned(), id), tx).is_some() {
            tracing::warn!(
                scope,
                id,
                "room id was already registered; replacing the previous room"
            );
        }
    }

    /// Removes the delivery target for (scope, id), if present.
    pub fn unbind(&self, scope: &str, id: u64) {
        let mut routes = self.routes.lock().expect("registry lock poisoned");
        routes.remove(&(scope.to_owned(), id));
    }

    /// Routes one pushed event to the room bound to `room_id`.
    ///
    /// Returns `false` when no live room is bound to that id (the
    /// caller logs; an event for an unknown room is not an error).
    /// Routes whose task has ended are pruned on the way.
    pub fn route(&self, room_id: u64, event: Event) -> bool {
        let mut routes = self.routes.lock().expect("registry lock poisoned");
        let key = routes
            .iter()
            .find(|((_, id), _)| *id == room_id)
            .map(|(key, _)| key.clone());
        let Some(key) = key else { return false };

        let delivered = routes
            .get(&key)
            .map(|tx| tx.send(RoomSignal::Push(event)).is_ok())
            .unwrap_or(false);
        if !delivered {
            routes.remove(&key);
        }
        delivered
    }

    /// Marks every registered room as no longer joined (the socket is
    /// gone). Handlers and registrations survive; a later rejoin
    /// reuses them.
    pub fn suspend_all(&self) {
        let routes = self.routes.lock().expect("registry lock poisoned");
        for tx in routes.values() {
            let _ = tx.send(RoomSignal::Suspended);
        }
    }

    /// The (scope → room ids) groups to rejoin after a reconnect,
    /// one join request per scope.
    pub fn rejoin_targets(&self) -> BTreeMap<String, Vec<u64>> {
        let routes = self.routes.lock().expect("registry lock poisoned");
        let mut targets: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        for (scope, id) in routes.keys() {
            targets.entry(scope.clone()).or_default().push(*id);
        }
        for ids in targets.values_mut() {
            ids.sort_unstable();
        }
        targets
    }

    /// Number of registered rooms.
    pub fn len(&self) -> usize {
        self.routes.lock().expect("registry lock poisoned").len()
    }

    /// `true` when no rooms are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
