//! Inbound frame dispatcher.
//!
//! One dispatch task per session drains frames in arrival order and routes
//! them into the trackers synchronously, so tracker mutation is serialized
//! without extra locking discipline at the call sites. A bad frame resolves
//! to a logged drop or a typed outcome — never a crash of the loop.

use std::collections::HashMap;
use tokio::sync::{RwLock, broadcast, watch};
use tracing::{debug, warn};

use job_flow::{ActorRole, JobAction, WorkflowError};

use crate::events::{LinkState, SessionEvent};
use crate::models::{DeliveryStatus, Message, MessageStore, ReadReceipt, Room};
use crate::presence::PresenceTracker;
use crate::unread::UnreadLedger;
use crate::workflows::WorkflowSet;

use super::protocol::ServerFrame;

/// A locally issued workflow action awaiting its transport acknowledgment.
/// The engine transition is applied only once the ack arrives, so a failed
/// send never leaves local and remote state diverged.
#[derive(Debug, Clone)]
pub(crate) struct PendingAction {
    pub room_id: String,
    pub workflow_id: String,
    pub role: ActorRole,
    pub expected_seq: u64,
    pub action: JobAction,
}

/// State shared between the coordinator's command surface, the bridge task,
/// and the dispatcher. Owned by the coordinator for the lifetime of an open
/// conversation view.
pub(crate) struct SessionShared {
    pub local_user_id: String,
    /// The conversation set for this session, keyed by room id.
    pub rooms: HashMap<String, Room>,
    /// Focused room, written by the UI layer through the coordinator only.
    pub active_room: RwLock<Option<String>>,
    pub presence: PresenceTracker,
    pub ledger: UnreadLedger,
    pub store: MessageStore,
    pub workflows: WorkflowSet,
    /// Workflow commands in flight, keyed by command uuid.
    pub pending_actions: RwLock<HashMap<String, PendingAction>>,
    /// Last authoritative read marker per room for the local user.
    pub local_markers: RwLock<HashMap<String, ReadReceipt>>,
    /// Peer read markers per room, for read receipts in the UI.
    pub peer_markers: RwLock<HashMap<String, ReadReceipt>>,
    pub events: broadcast::Sender<SessionEvent>,
    pub link: watch::Sender<LinkState>,
}

impl SessionShared {
    pub(crate) fn new(local_user_id: String, rooms: Vec<Room>) -> Self {
        let (events, _) = broadcast::channel(256);
        let (link, _) = watch::channel(LinkState::Disconnected);
        Self {
            local_user_id,
            rooms: rooms.into_iter().map(|r| (r.id.clone(), r)).collect(),
            active_room: RwLock::new(None),
            presence: PresenceTracker::new(),
            ledger: UnreadLedger::new(),
            store: MessageStore::new(),
            workflows: WorkflowSet::new(),
            pending_actions: RwLock::new(HashMap::new()),
            local_markers: RwLock::new(HashMap::new()),
            peer_markers: RwLock::new(HashMap::new()),
            events,
            link,
        }
    }

    /// Every other participant across the session's rooms, deduplicated.
    pub(crate) fn participant_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .rooms
            .values()
            .flat_map(|r| [r.employer_id.clone(), r.freelancer_id.clone()])
            .filter(|id| *id != self.local_user_id)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No receivers is fine — nobody is watching yet
        let _ = self.events.send(event);
    }

    pub(crate) fn set_link(&self, state: LinkState) {
        let _ = self.link.send(state);
        self.emit(SessionEvent::Link(state));
    }
}

/// What the bridge must do after a frame was dispatched.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DispatchOutcome {
    Continue,
    /// Missed workflow events were detected — fetch an authoritative
    /// snapshot and resync rather than applying anything out of order.
    ResyncWorkflow { workflow_id: String },
}

/// Route one inbound frame into the trackers.
pub(crate) async fn dispatch_frame(shared: &SessionShared, frame: ServerFrame) -> DispatchOutcome {
    match frame {
        ServerFrame::Chat { message: wire } => {
            let msg = Message {
                uuid: wire.uuid,
                server_id: Some(wire.id),
                server_seq: Some(wire.seq),
                room_id: wire.room_id,
                sender_id: wire.sender_id,
                sender_name: wire.sender_name,
                content: wire.content,
                status: DeliveryStatus::Sent,
                created_at: wire.created_at,
            };
            if shared.store.insert_inbound(msg.clone()).await {
                let active = shared.active_room.read().await.clone();
                // Replay after a rejoin can carry history the local marker
                // already covers; those must not count as unread again.
                let already_read = match shared.local_markers.read().await.get(&msg.room_id) {
                    Some(marker) => matches!(
                        (marker.last_read_msg_id, msg.server_id),
                        (Some(mark), Some(id)) if id <= mark
                    ),
                    None => false,
                };
                if msg.sender_id != shared.local_user_id
                    && active.as_deref() != Some(msg.room_id.as_str())
                    && !already_read
                {
                    shared.ledger.increment(&msg.room_id).await;
                    shared
                        .emit(SessionEvent::UnreadChanged(shared.ledger.snapshot().await));
                }
                shared.emit(SessionEvent::MessageReceived(msg));
            } else if let Some(id) = msg.server_id
                && let Some(confirmed) = shared
                    .store
                    .confirm(&msg.uuid, id, msg.server_seq.unwrap_or(id))
                    .await
            {
                // Server echo of our own optimistic message, seen before
                // (or instead of) the ack.
                shared.emit(SessionEvent::MessageUpdated {
                    room_id: confirmed.room_id,
                    uuid: confirmed.uuid,
                    status: DeliveryStatus::Sent,
                    server_id: confirmed.server_id,
                });
            }
            DispatchOutcome::Continue
        }

        ServerFrame::Presence {
            room_id,
            joins,
            leaves,
        } => {
            shared.presence.apply_diff(&joins, &leaves).await;
            let mut user_ids = joins;
            user_ids.extend(leaves);
            debug!(room = %room_id, users = user_ids.len(), "presence diff applied");
            shared.emit(SessionEvent::PresenceChanged { user_ids });
            DispatchOutcome::Continue
        }

        ServerFrame::GlobalPresence { item } => {
            let user_id = item.user_id.clone();
            if item.online {
                shared.presence.apply_diff(&[user_id.clone()], &[]).await;
            } else {
                shared.presence.apply_diff(&[], &[user_id.clone()]).await;
            }
            shared.emit(SessionEvent::PresenceChanged {
                user_ids: vec![user_id],
            });
            DispatchOutcome::Continue
        }

        ServerFrame::Workflow { event } => match shared.workflows.apply_remote(&event).await {
            None => {
                warn!(workflow = %event.workflow_id, "transition for workflow this session does not hold");
                DispatchOutcome::Continue
            }
            Some(Ok(())) => {
                shared.emit(SessionEvent::WorkflowChanged(event));
                DispatchOutcome::Continue
            }
            Some(Err(WorkflowError::SequenceGap { local, remote })) => {
                warn!(
                    workflow = %event.workflow_id,
                    local, remote, "workflow sequence gap, scheduling resync"
                );
                shared.emit(SessionEvent::WorkflowRefreshing {
                    workflow_id: event.workflow_id.clone(),
                });
                DispatchOutcome::ResyncWorkflow {
                    workflow_id: event.workflow_id,
                }
            }
            Some(Err(err)) => {
                // Stale/duplicate event — local state already covers it
                debug!(workflow = %event.workflow_id, %err, "dropping stale workflow event");
                DispatchOutcome::Continue
            }
        },

        ServerFrame::Ack {
            uuid,
            server_id,
            server_seq,
        } => {
            let pending = shared.pending_actions.write().await.remove(&uuid);
            if let Some(p) = pending {
                match shared
                    .workflows
                    .apply_local(&p.workflow_id, p.role, p.expected_seq, p.action)
                    .await
                {
                    Some(Ok(event)) => shared.emit(SessionEvent::WorkflowChanged(event)),
                    Some(Err(err)) => {
                        // The remote broadcast of this very transition (or a
                        // racing one) landed first; the engine already moved.
                        debug!(uuid = %uuid, %err, "acked action no longer applies locally");
                    }
                    None => warn!(workflow = %p.workflow_id, "ack for unregistered workflow"),
                }
                return DispatchOutcome::Continue;
            }

            if let (Some(id), Some(seq)) = (server_id, server_seq)
                && let Some(msg) = shared.store.confirm(&uuid, id, seq).await
            {
                shared.emit(SessionEvent::MessageUpdated {
                    room_id: msg.room_id,
                    uuid: msg.uuid,
                    status: DeliveryStatus::Sent,
                    server_id: msg.server_id,
                });
                return DispatchOutcome::Continue;
            }

            debug!(uuid = %uuid, "ack for unknown command");
            DispatchOutcome::Continue
        }

        ServerFrame::ReadMarker { receipt } => {
            if receipt.user_id == shared.local_user_id {
                // Another device/tab of the local user read the room: the
                // server marker wins over locally accumulated increments.
                let count = shared
                    .store
                    .unread_after(
                        &receipt.room_id,
                        receipt.last_read_msg_id,
                        &shared.local_user_id,
                    )
                    .await;
                shared.ledger.reconcile(&receipt.room_id, count).await;
                shared
                    .local_markers
                    .write()
                    .await
                    .insert(receipt.room_id.clone(), receipt);
                shared.emit(SessionEvent::UnreadChanged(shared.ledger.snapshot().await));
            } else {
                shared
                    .peer_markers
                    .write()
                    .await
                    .insert(receipt.room_id.clone(), receipt.clone());
                shared.emit(SessionEvent::PeerRead(receipt));
            }
            DispatchOutcome::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::WireMessage;
    use chrono::Utc;
    use job_flow::{JobStatus, QuoteTerms, WorkflowSnapshot};

    fn test_room() -> Room {
        Room {
            id: "r1".into(),
            employer_id: "emp".into(),
            freelancer_id: "me".into(),
            workflow: None,
        }
    }

    fn make_shared() -> SessionShared {
        SessionShared::new("me".into(), vec![test_room()])
    }

    fn chat_frame(uuid: &str, id: i64, sender: &str, room: &str) -> ServerFrame {
        ServerFrame::Chat {
            message: WireMessage {
                uuid: uuid.into(),
                id,
                seq: id,
                room_id: room.into(),
                sender_id: sender.into(),
                sender_name: sender.into(),
                content: "hi".into(),
                created_at: Utc::now(),
            },
        }
    }

    fn quote() -> JobAction {
        JobAction::SubmitQuotation {
            terms: QuoteTerms {
                amount_cents: 100,
                currency: "USD".into(),
                delivery_days: 1,
            },
        }
    }

    async fn register_wf(shared: &SessionShared, status: JobStatus, seq: u64) {
        shared
            .workflows
            .register(WorkflowSnapshot {
                workflow_id: "wf-1".into(),
                room_id: "r1".into(),
                status,
                seq,
            })
            .await;
    }

    #[tokio::test]
    async fn chat_for_inactive_room_increments_unread() {
        let shared = make_shared();

        dispatch_frame(&shared, chat_frame("a", 1, "emp", "r1")).await;
        dispatch_frame(&shared, chat_frame("b", 2, "emp", "r1")).await;

        assert_eq!(shared.ledger.room_count("r1").await, 2);
        assert_eq!(shared.ledger.total().await, 2);

        shared.ledger.mark_seen("r1").await;
        assert_eq!(shared.ledger.room_count("r1").await, 0);
        assert_eq!(shared.ledger.total().await, 0);
    }

    #[tokio::test]
    async fn chat_for_active_room_does_not_increment() {
        let shared = make_shared();
        *shared.active_room.write().await = Some("r1".into());

        dispatch_frame(&shared, chat_frame("a", 1, "emp", "r1")).await;
        assert_eq!(shared.ledger.total().await, 0);
        // Message still landed in the store
        assert_eq!(shared.store.room_messages("r1").await.len(), 1);
    }

    #[tokio::test]
    async fn replayed_history_behind_marker_is_not_unread() {
        let shared = make_shared();
        shared.local_markers.write().await.insert(
            "r1".into(),
            ReadReceipt {
                user_id: "me".into(),
                room_id: "r1".into(),
                last_read_msg_id: Some(5),
                updated_at: Utc::now(),
            },
        );

        dispatch_frame(&shared, chat_frame("a", 4, "emp", "r1")).await;
        dispatch_frame(&shared, chat_frame("b", 6, "emp", "r1")).await;

        assert_eq!(shared.ledger.room_count("r1").await, 1);
        assert_eq!(shared.store.room_messages("r1").await.len(), 2);
    }

    #[tokio::test]
    async fn own_message_echo_never_counts_as_unread() {
        let shared = make_shared();
        dispatch_frame(&shared, chat_frame("a", 1, "me", "r1")).await;
        assert_eq!(shared.ledger.total().await, 0);
    }

    #[tokio::test]
    async fn duplicate_chat_frame_is_dropped() {
        let shared = make_shared();
        dispatch_frame(&shared, chat_frame("a", 1, "emp", "r1")).await;
        dispatch_frame(&shared, chat_frame("a", 1, "emp", "r1")).await;
        assert_eq!(shared.ledger.total().await, 1);
        assert_eq!(shared.store.room_messages("r1").await.len(), 1);
    }

    #[tokio::test]
    async fn echo_of_optimistic_message_confirms_it() {
        let shared = make_shared();
        shared
            .store
            .push_pending(Message {
                uuid: "local-1".into(),
                server_id: None,
                server_seq: None,
                room_id: "r1".into(),
                sender_id: "me".into(),
                sender_name: "Me".into(),
                content: "hi".into(),
                status: DeliveryStatus::Pending,
                created_at: Utc::now(),
            })
            .await;

        dispatch_frame(&shared, chat_frame("local-1", 10, "me", "r1")).await;

        let msgs = shared.store.room_messages("r1").await;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].status, DeliveryStatus::Sent);
        assert_eq!(msgs[0].server_id, Some(10));
    }

    #[tokio::test]
    async fn workflow_frame_one_ahead_is_applied() {
        let shared = make_shared();
        register_wf(&shared, JobStatus::Created, 0).await;

        let mut remote = job_flow::WorkflowEngine::new("wf-1", "r1");
        let ev = remote.apply(ActorRole::Freelancer, 0, quote()).unwrap();

        let outcome = dispatch_frame(&shared, ServerFrame::Workflow { event: ev }).await;
        assert_eq!(outcome, DispatchOutcome::Continue);
        let snap = shared.workflows.snapshot_for_room("r1").await.unwrap();
        assert_eq!(snap.status, JobStatus::QuotationPendingReview);
        assert_eq!(snap.seq, 1);
    }

    #[tokio::test]
    async fn workflow_frame_two_ahead_schedules_resync_without_applying() {
        let shared = make_shared();
        register_wf(&shared, JobStatus::Created, 0).await;
        let mut events = shared.events.subscribe();

        let mut remote = job_flow::WorkflowEngine::new("wf-1", "r1");
        remote.apply(ActorRole::Freelancer, 0, quote()).unwrap();
        let ev2 = remote
            .apply(ActorRole::Employer, 1, JobAction::ApproveOrder)
            .unwrap();

        let outcome = dispatch_frame(&shared, ServerFrame::Workflow { event: ev2 }).await;
        assert_eq!(
            outcome,
            DispatchOutcome::ResyncWorkflow {
                workflow_id: "wf-1".into()
            }
        );
        // Frame was not applied
        let snap = shared.workflows.snapshot_for_room("r1").await.unwrap();
        assert_eq!(snap.status, JobStatus::Created);
        assert_eq!(snap.seq, 0);
        // UI was told a refresh is in flight
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::WorkflowRefreshing { .. }
        ));
    }

    #[tokio::test]
    async fn stale_workflow_frame_is_dropped_silently() {
        let shared = make_shared();
        register_wf(&shared, JobStatus::QuotationPendingReview, 1).await;

        let mut remote = job_flow::WorkflowEngine::new("wf-1", "r1");
        let ev1 = remote.apply(ActorRole::Freelancer, 0, quote()).unwrap();

        let outcome = dispatch_frame(&shared, ServerFrame::Workflow { event: ev1 }).await;
        assert_eq!(outcome, DispatchOutcome::Continue);
        let snap = shared.workflows.snapshot_for_room("r1").await.unwrap();
        assert_eq!(snap.seq, 1);
    }

    #[tokio::test]
    async fn ack_applies_pending_workflow_action_optimistically() {
        let shared = make_shared();
        register_wf(&shared, JobStatus::Created, 0).await;
        shared.pending_actions.write().await.insert(
            "cmd-1".into(),
            PendingAction {
                room_id: "r1".into(),
                workflow_id: "wf-1".into(),
                role: ActorRole::Freelancer,
                expected_seq: 0,
                action: quote(),
            },
        );
        let mut events = shared.events.subscribe();

        dispatch_frame(
            &shared,
            ServerFrame::Ack {
                uuid: "cmd-1".into(),
                server_id: None,
                server_seq: None,
            },
        )
        .await;

        // Transition applied only now, after the ack
        let snap = shared.workflows.snapshot_for_room("r1").await.unwrap();
        assert_eq!(snap.status, JobStatus::QuotationPendingReview);
        assert_eq!(snap.seq, 1);
        assert!(shared.pending_actions.read().await.is_empty());
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::WorkflowChanged(_)
        ));
    }

    #[tokio::test]
    async fn ack_confirms_pending_chat_message() {
        let shared = make_shared();
        shared
            .store
            .push_pending(Message {
                uuid: "m-1".into(),
                server_id: None,
                server_seq: None,
                room_id: "r1".into(),
                sender_id: "me".into(),
                sender_name: "Me".into(),
                content: "hello".into(),
                status: DeliveryStatus::Pending,
                created_at: Utc::now(),
            })
            .await;
        let mut events = shared.events.subscribe();

        dispatch_frame(
            &shared,
            ServerFrame::Ack {
                uuid: "m-1".into(),
                server_id: Some(5),
                server_seq: Some(5),
            },
        )
        .await;

        let msgs = shared.store.room_messages("r1").await;
        assert_eq!(msgs[0].status, DeliveryStatus::Sent);
        match events.try_recv().unwrap() {
            SessionEvent::MessageUpdated { status, server_id, .. } => {
                assert_eq!(status, DeliveryStatus::Sent);
                assert_eq!(server_id, Some(5));
            }
            other => panic!("Expected MessageUpdated, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn own_read_marker_reconciles_ledger() {
        let shared = make_shared();
        // Two peer messages arrive unfocused
        dispatch_frame(&shared, chat_frame("a", 1, "emp", "r1")).await;
        dispatch_frame(&shared, chat_frame("b", 2, "emp", "r1")).await;
        assert_eq!(shared.ledger.room_count("r1").await, 2);

        // Another tab read up to message 2
        dispatch_frame(
            &shared,
            ServerFrame::ReadMarker {
                receipt: ReadReceipt {
                    user_id: "me".into(),
                    room_id: "r1".into(),
                    last_read_msg_id: Some(2),
                    updated_at: Utc::now(),
                },
            },
        )
        .await;

        assert_eq!(shared.ledger.room_count("r1").await, 0);
        assert_eq!(shared.ledger.total().await, 0);
    }

    #[tokio::test]
    async fn out_of_order_marker_clamps_to_zero() {
        let shared = make_shared();
        dispatch_frame(&shared, chat_frame("a", 1, "emp", "r1")).await;

        // Marker references an id never observed locally
        dispatch_frame(
            &shared,
            ServerFrame::ReadMarker {
                receipt: ReadReceipt {
                    user_id: "me".into(),
                    room_id: "r1".into(),
                    last_read_msg_id: Some(999),
                    updated_at: Utc::now(),
                },
            },
        )
        .await;

        assert_eq!(shared.ledger.room_count("r1").await, 0);
        assert_eq!(shared.ledger.total().await, 0);
    }

    #[tokio::test]
    async fn peer_marker_emits_read_receipt() {
        let shared = make_shared();
        let mut events = shared.events.subscribe();

        dispatch_frame(
            &shared,
            ServerFrame::ReadMarker {
                receipt: ReadReceipt {
                    user_id: "emp".into(),
                    room_id: "r1".into(),
                    last_read_msg_id: Some(3),
                    updated_at: Utc::now(),
                },
            },
        )
        .await;

        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::PeerRead(_)
        ));
        assert_eq!(shared.ledger.total().await, 0);
    }

    #[tokio::test]
    async fn presence_frames_route_to_tracker() {
        let shared = make_shared();

        dispatch_frame(
            &shared,
            ServerFrame::Presence {
                room_id: "r1".into(),
                joins: vec!["emp".into()],
                leaves: vec![],
            },
        )
        .await;
        assert_eq!(shared.presence.query("emp").await.online, Some(true));

        dispatch_frame(
            &shared,
            ServerFrame::GlobalPresence {
                item: crate::presence::PresenceSnapshotItem {
                    user_id: "emp".into(),
                    online: false,
                    last_seen: None,
                },
            },
        )
        .await;
        assert_eq!(shared.presence.query("emp").await.online, Some(false));
    }

    #[test]
    fn participant_ids_excludes_local_user() {
        let shared = make_shared();
        assert_eq!(shared.participant_ids(), vec!["emp".to_string()]);
    }
}
