//! The pending-request table: matches responses to their callers.
//!
//! Every outbound request gets a pid (u16) that the server echoes in
//! its reply. The correlator owns the table from pid to the caller's
//! reply channel for the lifetime of one physical connection:
//!
//! - a pid is never reused while still pending,
//! - a response resolves exactly one caller,
//! - duplicate or unknown pids are logged no-ops,
//! - connection loss fails every pending caller at once, so nobody
//!   hangs across a dropped socket.

use std::collections::HashMap;
use std::sync::Mutex;

use karst_protocol::Value;
use tokio::sync::oneshot;

use crate::{Error, Result};

/// Size of the pid space (`u16`).
const PID_SPACE: usize = 0x10000;

type ReplyTx = oneshot::Sender<Result<Value>>;

/// Receiver half handed to the caller awaiting a response.
pub type ReplyRx = oneshot::Receiver<Result<Value>>;

#[derive(Default)]
struct Table {
    /// Monotonic pid counter, wrapping at the u16 boundary.
    next_pid: u16,
    /// In-flight requests by pid.
    pending: HashMap<u16, ReplyTx>,
}

/// The pending-request table for one physical connection.
#[derive(Default)]
pub struct Correlator {
    table: Mutex<Table>,
}

impl Correlator {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new request: assigns the next free pid and returns
    /// it with the channel the response will arrive on.
    ///
    /// Fails with [`Error::Usage`] when all 65536 pids are in flight.
    pub fn register(&self) -> Result<(u16, ReplyRx)> {
        let mut table = self.table.lock().expect("correlator lock poisoned");
        if table.pending.len() >= PID_SPACE {
            return Err(Error::Usage(
                "request id space exhausted (65536 requests in flight)".into(),
            ));
        }
        // Advance past pids still pending; the length check above
        // guarantees a free one exists.
        loop {
            table.next_pid = table.next_pid.wrapping_add(1);
            if !table.pending.contains_key(&table.next_pid) {
                break;
            }
        }
        let pid = table.next_pid;
        let (tx, rx) = oneshot::channel();
        table.pending.insert(pid, tx);
        Ok((pid, rx))
    }

    /// Completes the pending request for `pid`, releasing the pid.
    ///
    /// Unknown or already-resolved pids are no-ops: duplicate delivery
    /// and responses arriving after a timeout must not disturb anyone.
    pub fn resolve(&self, pid: u16, result: Result<Value>) {
        let tx = {
            let mut table = self.table.lock().expect("correlator lock poisoned");
            table.pending.remove(&pid)
        };
        match tx {
            Some(tx) => {
                // The caller may have stopped waiting (timeout); a
                // failed send is fine.
                let _ = tx.send(result);
            }
            None => {
                tracing::warn!(pid, "response for unknown request id, ignoring");
            }
        }
    }

    /// Abandons the pending request for `pid` without notifying anyone
    /// (the caller already gave up, e.g. its timeout fired).
    pub fn cancel(&self, pid: u16) {
        let mut table = self.table.lock().expect("correlator lock poisoned");
        table.pending.remove(&pid);
    }

    /// Fails every pending request with a connection-lost error.
    /// Called on disconnect so the table is empty the moment the
    /// connection reports closed.
    pub fn fail_all(&self, reason: &str) {
        let drained: Vec<(u16, ReplyTx)> = {
            let mut table = self.table.lock().expect("correlator lock poisoned");
            table.pending.drain().collect()
        };
        if !drained.is_empty() {
            tracing::warn!(
                count = drained.len(),
                reason,
                "failing pending requests"
            );
        }
        for (_pid, tx) in drained {
            let _ = tx.send(Err(Error::ConnectionLost(reason.to_owned())));
        }
    }

    /// Number of requests currently in flight.
    pub fn len(&self) -> usize {
        self.table.lock().expect("correlator lock poisoned").pending.len()
    }

    /// `true` when nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
