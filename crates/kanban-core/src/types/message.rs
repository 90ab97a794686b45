use serde::{Deserialize, Serialize};

use super::Board;

/// Messages the server addresses to a single session, as opposed to board
/// events which are fanned out to everyone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full board snapshot sent once when a session joins.
    SyncState { data: Board },
    /// A command from this session was not appended to the log.
    CommandRejected { reason: RejectReason, detail: String },
}

/// Borrowed `sync_state`, encoded straight from a board the caller does not
/// own. Same wire shape as [`ServerMessage::SyncState`].
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "type", rename = "sync_state")]
pub struct SyncStateRef<'a> {
    pub data: &'a Board,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The payload could not be decoded as an event.
    Malformed,
    /// The payload decoded but is not a board mutation (e.g. `health`).
    NotACommand,
    /// The log refused the append.
    WriteFailed,
}
