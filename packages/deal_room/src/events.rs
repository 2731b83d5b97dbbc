//! Events fanned out to UI observers.

use job_flow::{JobAction, TransitionEvent, WorkflowSnapshot};

use crate::models::{DeliveryStatus, Message, ReadReceipt};
use crate::unread::UnreadSnapshot;

/// Lifecycle of the realtime link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Joined,
}

/// One update pushed to subscribers. Everything the UI renders reactively
/// flows through this channel; `current_state()` covers the initial render.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The link changed state. `Disconnected` surfaces as a passive
    /// reconnecting indicator, not a blocking error.
    Link(LinkState),
    /// An inbound chat message was appended to the store.
    MessageReceived(Message),
    /// A local message changed delivery status (acked, failed, retried).
    MessageUpdated {
        room_id: String,
        uuid: String,
        status: DeliveryStatus,
        server_id: Option<i64>,
    },
    /// A workflow transition was accepted (local ack or remote event).
    WorkflowChanged(TransitionEvent),
    /// Missed workflow events were detected; an authoritative refetch is in
    /// flight. Surfaces as "this conversation changed, refreshing…".
    WorkflowRefreshing { workflow_id: String },
    /// The refetch landed and local state was replaced.
    WorkflowResynced(WorkflowSnapshot),
    /// A sent action got no acknowledgment (or the send failed); it never
    /// reached the workflow and the caller may re-issue it.
    WorkflowActionFailed {
        room_id: String,
        uuid: String,
        action: JobAction,
    },
    /// Online/offline state changed for these users.
    PresenceChanged { user_ids: Vec<String> },
    /// Unread counters changed.
    UnreadChanged(UnreadSnapshot),
    /// The peer's read marker advanced (read receipts in the UI).
    PeerRead(ReadReceipt),
}
