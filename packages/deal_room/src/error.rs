use std::time::Duration;

use job_flow::WorkflowError;

/// Session-level error taxonomy.
///
/// Only `TransportDisconnected` drives the reconnect state machine;
/// everything else is handled within a single dispatch or returned to the
/// caller without tearing down the connection.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Role/state/sequence rejections from the workflow engine.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// The realtime link is down; reconnect with backoff is in progress.
    #[error("transport disconnected")]
    TransportDisconnected,

    /// No acknowledgment arrived within the bounded window. The message or
    /// action is marked failed and is retryable by the caller.
    #[error("no acknowledgment within {0:?}")]
    SendTimeout(Duration),

    /// An inbound frame did not match any expected kind/shape. Logged and
    /// dropped by the dispatch loop, surfaced only from parse helpers.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// HTTP collaborator failure (read-marker seed, presence snapshot,
    /// workflow refetch).
    #[error("backend request failed: {0}")]
    Backend(String),

    /// The caller referenced a room this session does not hold.
    #[error("unknown room: {0}")]
    UnknownRoom(String),

    /// The room has no active workflow to act on.
    #[error("room {0} has no active workflow")]
    NoWorkflow(String),

    /// The local user is not a participant of the room.
    #[error("user {user_id} is not a participant of room {room_id}")]
    NotParticipant { room_id: String, user_id: String },

    /// The coordinator was shut down; its outbound queue is gone.
    #[error("session closed")]
    Closed,
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Backend(err.to_string())
    }
}
