//! Dump file for payloads that fail to decode.
//!
//! A process-wide, optional file path. When set, every payload body
//! that fails MessagePack decoding is written to it verbatim — body
//! bytes only, never the frame header — overwriting the previous dump
//! so at most the most recent failure is retained. One path serves
//! every client in the process; this is a debugging aid, not per-client
//! state.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

static FAIL_FILE: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Configures the dump file for payloads that fail to decode.
///
/// Pass `None` to disable dumping again. Intended to be set once at
/// startup; the path is read by every decode-failure path process-wide.
pub fn set_fail_file(path: Option<impl AsRef<Path>>) {
    let mut guard = FAIL_FILE.write().expect("fail-file lock poisoned");
    *guard = path.map(|p| p.as_ref().to_owned());
}

/// Writes `body` to the configured dump file, if one is set.
///
/// Failures to write are logged and swallowed; dumping must never
/// affect control flow.
pub fn dump(body: &[u8]) {
    let path = {
        let guard = FAIL_FILE.read().expect("fail-file lock poisoned");
        guard.clone()
    };
    let Some(path) = path else { return };
    match fs::write(&path, body) {
        Ok(()) => {
            tracing::warn!(path = %path.display(), len = body.len(), "wrote undecodable payload to fail file");
        }
        Err(err) => {
            tracing::error!(path = %path.display(), %err, "failed to write fail file");
        }
    }
}
