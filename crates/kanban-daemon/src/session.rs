//! Per-viewer session lifecycle: join with a consistent snapshot, forward
//! commands to the log, leave.

use std::sync::Arc;

use kanban_core::codec::{self, DecodeError};
use kanban_core::types::{RejectReason, ServerMessage, SyncStateRef};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::hub::{FanoutHub, Frame, SubscriberId};
use crate::projection::SharedProjection;
use crate::writer::{LogWriter, WriteError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Joined,
    /// Terminal.
    Left,
}

#[derive(Debug)]
pub struct Session {
    user_id: String,
    subscriber: Option<SubscriberId>,
    state: SessionState,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Hub subscriber id, while joined.
    pub fn subscriber(&self) -> Option<SubscriberId> {
        self.subscriber
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot join a session in state {0:?}")]
    InvalidState(SessionState),

    #[error("snapshot could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("snapshot could not be queued")]
    Undelivered,
}

/// Why a command was not appended.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("session is not joined")]
    NotJoined,

    #[error("{0}")]
    Malformed(#[from] DecodeError),

    #[error("`{0}` is not a board command")]
    NotACommand(&'static str),

    #[error("{0}")]
    Write(#[from] WriteError),
}

impl SubmitError {
    pub fn reason(&self) -> RejectReason {
        match self {
            Self::Malformed(_) => RejectReason::Malformed,
            Self::NotACommand(_) => RejectReason::NotACommand,
            Self::NotJoined | Self::Write(_) => RejectReason::WriteFailed,
        }
    }

    /// The `command_rejected` message sent back to the originating session.
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::CommandRejected {
            reason: self.reason(),
            detail: self.to_string(),
        }
    }
}

/// Ties the projection, the hub and the writer together for sessions.
///
/// Join registers with the hub and queues `sync_state` under the projection's
/// read guard. The reader applies and broadcasts under the write guard, so a
/// new session's snapshot is exactly the log prefix before the first event it
/// receives.
pub struct SessionCoordinator {
    store: SharedProjection,
    hub: Arc<FanoutHub>,
    writer: LogWriter,
}

impl SessionCoordinator {
    pub fn new(store: SharedProjection, hub: Arc<FanoutHub>, writer: LogWriter) -> Self {
        Self { store, hub, writer }
    }

    pub fn hub(&self) -> &Arc<FanoutHub> {
        &self.hub
    }

    pub fn connect(&self, user_id: impl Into<String>) -> Session {
        let session = Session {
            user_id: user_id.into(),
            subscriber: None,
            state: SessionState::Connecting,
        };
        debug!(user = %session.user_id, "session: connecting");
        session
    }

    /// Subscribe `session` and queue its `sync_state` as the first frame.
    pub async fn join(&self, session: &mut Session) -> Result<mpsc::Receiver<Frame>, SessionError> {
        if session.state != SessionState::Connecting {
            return Err(SessionError::InvalidState(session.state));
        }

        let (handle, rx) = self.hub.handle();
        let id = handle.id();
        let hub = &self.hub;
        let delivered = self
            .store
            .snapshot_then(|board| {
                let text = codec::encode(&SyncStateRef { data: board })?;
                Ok::<_, serde_json::Error>(hub.register_with_first(handle, Arc::from(text)))
            })
            .await?;

        if !delivered {
            session.state = SessionState::Left;
            return Err(SessionError::Undelivered);
        }

        session.subscriber = Some(id);
        session.state = SessionState::Joined;
        info!(
            user = %session.user_id,
            subscriber = id,
            subscribers = self.hub.len(),
            "session: joined"
        );
        Ok(rx)
    }

    /// Validate `raw` and append it, unchanged, to the log. The board is not
    /// touched here; the change arrives later through the reader.
    pub async fn submit(&self, session: &Session, raw: &str) -> Result<u64, SubmitError> {
        if session.state != SessionState::Joined {
            return Err(SubmitError::NotJoined);
        }
        let event = codec::decode_event_str(raw)?;
        if !event.is_mutation() {
            return Err(SubmitError::NotACommand(event.kind()));
        }
        let offset = self.writer.publish(raw).await?;
        debug!(
            user = %session.user_id,
            kind = event.kind(),
            card = event.card_id().unwrap_or("-"),
            offset,
            "session: command published"
        );
        Ok(offset)
    }

    /// Move to `Left` and drop the hub subscription. Returns `false` if the
    /// session had already left.
    pub fn leave(&self, session: &mut Session) -> bool {
        if session.state == SessionState::Left {
            return false;
        }
        if let Some(id) = session.subscriber.take() {
            self.hub.unregister(id);
        }
        session.state = SessionState::Left;
        info!(
            user = %session.user_id,
            subscribers = self.hub.len(),
            "session: left"
        );
        true
    }
}
