//! Message-type identifiers for the Karst wire protocol.
//!
//! Every frame on the wire carries one of these type ids in its header.
//! The id space is split in three bands:
//!
//! - `0x00..=0x0F` — events, pushed by the server without a matching
//!   request (node status changes, warnings, room traffic).
//! - `0x10..=0x1F` — responses, correlated to a request by pid.
//! - `0x20..=0x2F` — requests, initiated by the client.
//!
//! The header also carries an integrity marker derived from the type id
//! (`tp ^ 0xFF`). A frame whose marker does not match its type is
//! corrupt and the connection carrying it must be torn down.

use std::fmt;

/// A wire message type.
///
/// The discriminant values are the on-wire ids and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Proto {
    // -- Events (server → client, unsolicited) --
    /// A node changed status (e.g. "SHUTTING_DOWN" announces a restart).
    NodeStatus = 0x00,
    /// A warning the server wants logged client-side.
    Warn = 0x05,
    /// Membership of a joined room was (re-)confirmed.
    RoomJoin = 0x06,
    /// The client has left a room.
    RoomLeave = 0x07,
    /// An event was emitted to a joined room.
    RoomEmit = 0x08,
    /// A joined room was deleted server-side.
    RoomDelete = 0x09,

    // -- Responses (server → client, correlated by pid) --
    /// Reply to [`Proto::Ping`]; carries no payload.
    ResPing = 0x10,
    /// Success reply carrying no payload.
    ResOk = 0x11,
    /// Success reply carrying a value payload.
    ResData = 0x12,
    /// Error reply carrying `{error_code, error_msg}`.
    ResError = 0x13,

    // -- Requests (client → server) --
    /// Liveness check.
    Ping = 0x20,
    /// Authenticate with a token or username/password.
    Auth = 0x21,
    /// Run code in a scope.
    Query = 0x22,
    /// Run a stored procedure in a scope.
    Run = 0x25,
    /// Join one or more rooms in a scope.
    Join = 0x26,
    /// Leave one or more rooms in a scope.
    Leave = 0x27,
    /// Emit an event to a room.
    Emit = 0x28,
}

impl Proto {
    /// Looks up a type by its on-wire id.
    pub fn from_u8(tp: u8) -> Option<Self> {
        Some(match tp {
            0x00 => Self::NodeStatus,
            0x05 => Self::Warn,
            0x06 => Self::RoomJoin,
            0x07 => Self::RoomLeave,
            0x08 => Self::RoomEmit,
            0x09 => Self::RoomDelete,
            0x10 => Self::ResPing,
            0x11 => Self::ResOk,
            0x12 => Self::ResData,
            0x13 => Self::ResError,
            0x20 => Self::Ping,
            0x21 => Self::Auth,
            0x22 => Self::Query,
            0x25 => Self::Run,
            0x26 => Self::Join,
            0x27 => Self::Leave,
            0x28 => Self::Emit,
            _ => return None,
        })
    }

    /// The integrity marker belonging to this type.
    pub fn check(self) -> u8 {
        self as u8 ^ 0xFF
    }

    /// `true` for server-pushed events.
    pub fn is_event(self) -> bool {
        (self as u8) < 0x10
    }

    /// `true` for correlated responses.
    pub fn is_response(self) -> bool {
        matches!(
            self,
            Self::ResPing | Self::ResOk | Self::ResData | Self::ResError
        )
    }

    /// `true` for client-initiated requests.
    pub fn is_request(self) -> bool {
        (self as u8) >= 0x20
    }

    /// `true` for the room-scoped event types (carry a room id).
    pub fn is_room_event(self) -> bool {
        matches!(
            self,
            Self::RoomJoin | Self::RoomLeave | Self::RoomEmit | Self::RoomDelete
        )
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:02x})", self, *self as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u8_round_trips_every_type() {
        let all = [
            Proto::NodeStatus,
            Proto::Warn,
            Proto::RoomJoin,
            Proto::RoomLeave,
            Proto::RoomEmit,
            Proto::RoomDelete,
            Proto::ResPing,
            Proto::ResOk,
            Proto::ResData,
            Proto::ResError,
            Proto::Ping,
            Proto::Auth,
            Proto::Query,
            Proto::Run,
            Proto::Join,
            Proto::Leave,
            Proto::Emit,
        ];
        for tp in all {
            assert_eq!(Proto::from_u8(tp as u8), Some(tp));
        }
    }

    #[test]
    fn test_from_u8_unknown_id_returns_none() {
        assert_eq!(Proto::from_u8(0x01), None);
        assert_eq!(Proto::from_u8(0x29), None);
        assert_eq!(Proto::from_u8(0xFF), None);
    }

    #[test]
    fn test_check_is_complement_of_id() {
        assert_eq!(Proto::Query.check(), 0x22 ^ 0xFF);
        assert_eq!(Proto::NodeStatus.check(), 0xFF);
    }

    #[test]
    fn test_band_classification() {
        assert!(Proto::RoomEmit.is_event());
        assert!(!Proto::RoomEmit.is_response());
        assert!(Proto::ResData.is_response());
        assert!(!Proto::ResData.is_request());
        assert!(Proto::Auth.is_request());
        assert!(!Proto::Auth.is_event());
    }

    #[test]
    fn test_room_events_carry_room_ids() {
        assert!(Proto::RoomJoin.is_room_event());
        assert!(Proto::RoomDelete.is_room_event());
        assert!(!Proto::NodeStatus.is_room_event());
        assert!(!Proto::Warn.is_room_event());
    }
}
