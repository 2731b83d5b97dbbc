//! Session composition root.
//!
//! A [`RoomCoordinator`] owns one signed-in user's conversation set: it wires
//! the trackers together, spawns the bridge task, and exposes the command
//! surface the UI layer calls. Reads are served from local state; writes go
//! through the outbound queue and resolve via acks.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use job_flow::{ActorRole, JobAction, WorkflowSnapshot};

use crate::backend::Backend;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{LinkState, SessionEvent};
use crate::models::{DeliveryStatus, Message, ReadReceipt, Room};
use crate::presence::PresenceView;
use crate::unread::UnreadSnapshot;
use crate::ws::bridge::{OutboundCommand, run_bridge};
use crate::ws::dispatch::{PendingAction, SessionShared};

pub struct RoomCoordinator<B: Backend> {
    shared: Arc<SessionShared>,
    backend: Arc<B>,
    local_name: String,
    outbound: mpsc::Sender<OutboundCommand>,
    cancel: CancellationToken,
}

impl<B: Backend> RoomCoordinator<B> {
    /// Assemble a session and start its bridge task. The link comes up in
    /// the background; callers watch [`LinkState`] rather than blocking.
    pub async fn new(
        local_user_id: impl Into<String>,
        local_name: impl Into<String>,
        rooms: Vec<Room>,
        backend: B,
        config: SessionConfig,
    ) -> Self {
        let shared = Arc::new(SessionShared::new(local_user_id.into(), rooms));
        for room in shared.rooms.values() {
            if let Some(snapshot) = &room.workflow {
                shared.workflows.register(snapshot.clone()).await;
            }
        }

        let backend = Arc::new(backend);
        let (outbound, outbound_rx) = mpsc::channel(config.outbound_queue);
        let cancel = CancellationToken::new();

        info!(
            rooms = shared.rooms.len(),
            user = %shared.local_user_id,
            "starting room session"
        );
        tokio::spawn(run_bridge(
            shared.clone(),
            backend.clone(),
            config,
            outbound_rx,
            cancel.clone(),
        ));

        Self {
            shared,
            backend,
            local_name: local_name.into(),
            outbound,
            cancel,
        }
    }

    /// Pull authoritative read markers for every room. Best-effort: a room
    /// whose marker cannot be fetched just starts without one.
    pub async fn seed(&self) {
        for room_id in self.shared.rooms.keys() {
            match self
                .backend
                .last_read(room_id, &self.shared.local_user_id)
                .await
            {
                Ok(receipt) => {
                    self.shared
                        .local_markers
                        .write()
                        .await
                        .insert(room_id.clone(), receipt);
                }
                Err(err) => warn!(room = %room_id, %err, "failed to seed read marker"),
            }
        }
    }

    /// Queue a chat message. The returned message is already in the local
    /// store as `Pending`; delivery resolves through [`SessionEvent::MessageUpdated`].
    pub async fn send_message(
        &self,
        room_id: &str,
        content: impl Into<String>,
    ) -> Result<Message, SessionError> {
        self.room(room_id)?;
        self.role_in(room_id)
            .ok_or_else(|| SessionError::NotParticipant {
                room_id: room_id.to_string(),
                user_id: self.shared.local_user_id.clone(),
            })?;

        let message = Message {
            uuid: Uuid::new_v4().to_string(),
            server_id: None,
            server_seq: None,
            room_id: room_id.to_string(),
            sender_id: self.shared.local_user_id.clone(),
            sender_name: self.local_name.clone(),
            content: content.into(),
            status: DeliveryStatus::Pending,
            created_at: chrono::Utc::now(),
        };
        self.shared.store.push_pending(message.clone()).await;
        self.shared
            .emit(SessionEvent::MessageReceived(message.clone()));

        self.enqueue_chat(&message).await;
        Ok(message)
    }

    /// Re-queue a message that previously failed. No-op for messages in any
    /// other state.
    pub async fn retry_message(&self, uuid: &str) -> Result<(), SessionError> {
        let Some(message) = self.shared.store.mark_retrying(uuid).await else {
            return Ok(());
        };
        self.shared.emit(SessionEvent::MessageUpdated {
            room_id: message.room_id.clone(),
            uuid: message.uuid.clone(),
            status: DeliveryStatus::Pending,
            server_id: None,
        });
        self.enqueue_chat(&message).await;
        Ok(())
    }

    async fn enqueue_chat(&self, message: &Message) {
        let command = OutboundCommand::Chat {
            room_id: message.room_id.clone(),
            uuid: message.uuid.clone(),
            content: message.content.clone(),
        };
        if self.outbound.send(command).await.is_err() {
            // Bridge is gone; resolve the send immediately instead of
            // leaving the message pending forever.
            self.shared.store.mark_failed(&message.uuid).await;
            self.shared.emit(SessionEvent::MessageUpdated {
                room_id: message.room_id.clone(),
                uuid: message.uuid.clone(),
                status: DeliveryStatus::Failed,
                server_id: None,
            });
        }
    }

    /// Issue a workflow action for a room. Validation is local and fail-fast;
    /// a valid action is queued and applied only once the server acks it.
    /// Returns the command uuid the resolution events will carry.
    pub async fn act(&self, room_id: &str, action: JobAction) -> Result<String, SessionError> {
        self.room(room_id)?;
        let role = self
            .role_in(room_id)
            .ok_or_else(|| SessionError::NotParticipant {
                room_id: room_id.to_string(),
                user_id: self.shared.local_user_id.clone(),
            })?;

        let (workflow_id, expected_seq, next) = self
            .shared
            .workflows
            .check(room_id, role, &action)
            .await
            .ok_or_else(|| SessionError::NoWorkflow(room_id.to_string()))??;
        debug!(
            room = %room_id,
            workflow = %workflow_id,
            action = action.name(),
            %next,
            "workflow action validated, sending"
        );

        let uuid = Uuid::new_v4().to_string();
        self.shared.pending_actions.write().await.insert(
            uuid.clone(),
            PendingAction {
                room_id: room_id.to_string(),
                workflow_id: workflow_id.clone(),
                role,
                expected_seq,
                action: action.clone(),
            },
        );

        let command = OutboundCommand::Workflow {
            room_id: room_id.to_string(),
            uuid: uuid.clone(),
            workflow_id,
            seq_number: expected_seq,
            action: action.clone(),
        };
        if self.outbound.send(command).await.is_err() {
            self.shared.pending_actions.write().await.remove(&uuid);
            self.shared.emit(SessionEvent::WorkflowActionFailed {
                room_id: room_id.to_string(),
                uuid,
                action,
            });
            return Err(SessionError::Closed);
        }
        Ok(uuid)
    }

    /// Focus a room (or none). Focusing marks the room seen locally.
    pub async fn set_active_room(&self, room_id: Option<&str>) {
        *self.shared.active_room.write().await = room_id.map(str::to_string);
        if let Some(room_id) = room_id
            && self.shared.ledger.mark_seen(room_id).await > 0
        {
            self.shared
                .emit(SessionEvent::UnreadChanged(self.shared.ledger.snapshot().await));
        }
    }

    /// The local user's role in a room, if they participate in it.
    pub fn role_in(&self, room_id: &str) -> Option<ActorRole> {
        let room = self.shared.rooms.get(room_id)?;
        if room.employer_id == self.shared.local_user_id {
            Some(ActorRole::Employer)
        } else if room.freelancer_id == self.shared.local_user_id {
            Some(ActorRole::Freelancer)
        } else {
            None
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn link_state(&self) -> LinkState {
        *self.shared.link.subscribe().borrow()
    }

    pub fn link_changes(&self) -> watch::Receiver<LinkState> {
        self.shared.link.subscribe()
    }

    pub async fn messages(&self, room_id: &str) -> Vec<Message> {
        self.shared.store.room_messages(room_id).await
    }

    pub async fn presence(&self, user_id: &str) -> PresenceView {
        self.shared.presence.query(user_id).await
    }

    pub async fn unread(&self) -> UnreadSnapshot {
        self.shared.ledger.snapshot().await
    }

    pub async fn workflow(&self, room_id: &str) -> Option<WorkflowSnapshot> {
        self.shared.workflows.snapshot_for_room(room_id).await
    }

    /// The peer's read marker for a room, if one has been observed.
    pub async fn peer_read_marker(&self, room_id: &str) -> Option<ReadReceipt> {
        self.shared.peer_markers.read().await.get(room_id).cloned()
    }

    /// Stop the bridge task and mark the session closed. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn room(&self, room_id: &str) -> Result<&Room, SessionError> {
        self.shared
            .rooms
            .get(room_id)
            .ok_or_else(|| SessionError::UnknownRoom(room_id.to_string()))
    }
}

impl<B: Backend> Drop for RoomCoordinator<B> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceSnapshotItem;
    use chrono::Utc;
    use job_flow::{JobStatus, QuoteTerms, WorkflowError};

    struct FakeBackend;

    impl Backend for FakeBackend {
        async fn last_read(
            &self,
            room_id: &str,
            user_id: &str,
        ) -> Result<ReadReceipt, SessionError> {
            Ok(ReadReceipt {
                user_id: user_id.to_string(),
                room_id: room_id.to_string(),
                last_read_msg_id: Some(7),
                updated_at: Utc::now(),
            })
        }

        async fn presence_snapshot(
            &self,
            user_ids: &[String],
        ) -> Result<Vec<PresenceSnapshotItem>, SessionError> {
            Ok(user_ids
                .iter()
                .map(|id| PresenceSnapshotItem {
                    user_id: id.clone(),
                    online: false,
                    last_seen: None,
                })
                .collect())
        }

        async fn fetch_workflow(
            &self,
            workflow_id: &str,
        ) -> Result<WorkflowSnapshot, SessionError> {
            Ok(WorkflowSnapshot {
                workflow_id: workflow_id.to_string(),
                room_id: "r1".into(),
                status: JobStatus::Created,
                seq: 0,
            })
        }
    }

    fn test_rooms() -> Vec<Room> {
        vec![Room {
            id: "r1".into(),
            employer_id: "emp".into(),
            freelancer_id: "me".into(),
            workflow: Some(WorkflowSnapshot {
                workflow_id: "wf-1".into(),
                room_id: "r1".into(),
                status: JobStatus::Created,
                seq: 0,
            }),
        }]
    }

    fn test_config() -> SessionConfig {
        // Unroutable url: the bridge stays in its retry loop for the whole
        // test without ever joining.
        SessionConfig {
            realtime_url: "ws://127.0.0.1:1/ws".into(),
            ..SessionConfig::default()
        }
    }

    async fn coordinator() -> RoomCoordinator<FakeBackend> {
        RoomCoordinator::new("me", "Me", test_rooms(), FakeBackend, test_config()).await
    }

    #[tokio::test]
    async fn send_message_is_optimistic() {
        let coord = coordinator().await;

        let msg = coord.send_message("r1", "hello").await.unwrap();
        assert_eq!(msg.status, DeliveryStatus::Pending);
        assert_eq!(msg.sender_id, "me");

        let stored = coord.messages("r1").await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].uuid, msg.uuid);
        coord.shutdown();
    }

    #[tokio::test]
    async fn send_message_to_unknown_room_fails() {
        let coord = coordinator().await;
        match coord.send_message("nope", "hello").await {
            Err(SessionError::UnknownRoom(room)) => assert_eq!(room, "nope"),
            other => panic!("Expected UnknownRoom, got {:?}", other),
        }
        coord.shutdown();
    }

    #[tokio::test]
    async fn act_validates_before_sending() {
        let coord = coordinator().await;

        // "me" is the freelancer in r1; approveOrder is an employer action
        match coord.act("r1", JobAction::ApproveOrder).await {
            Err(SessionError::Workflow(WorkflowError::InvalidTransition { .. })) => {}
            other => panic!("Expected InvalidTransition, got {:?}", other),
        }
        // Nothing queued, nothing mutated
        assert!(coord.shared.pending_actions.read().await.is_empty());
        assert_eq!(
            coord.workflow("r1").await.unwrap().status,
            JobStatus::Created
        );
        coord.shutdown();
    }

    #[tokio::test]
    async fn act_queues_without_mutating_engine() {
        let coord = coordinator().await;

        let uuid = coord
            .act(
                "r1",
                JobAction::SubmitQuotation {
                    terms: QuoteTerms {
                        amount_cents: 5000,
                        currency: "USD".into(),
                        delivery_days: 3,
                    },
                },
            )
            .await
            .unwrap();

        // Pending until the ack lands
        assert!(coord.shared.pending_actions.read().await.contains_key(&uuid));
        let snap = coord.workflow("r1").await.unwrap();
        assert_eq!(snap.status, JobStatus::Created);
        assert_eq!(snap.seq, 0);
        coord.shutdown();
    }

    #[tokio::test]
    async fn focusing_a_room_clears_its_unread() {
        let coord = coordinator().await;
        coord.shared.ledger.increment("r1").await;
        coord.shared.ledger.increment("r1").await;

        coord.set_active_room(Some("r1")).await;
        let snapshot = coord.unread().await;
        assert_eq!(snapshot.total, 0);
        assert!(snapshot.rooms.is_empty());
        coord.shutdown();
    }

    #[tokio::test]
    async fn seed_pulls_read_markers() {
        let coord = coordinator().await;
        coord.seed().await;
        let markers = coord.shared.local_markers.read().await;
        assert_eq!(markers.get("r1").unwrap().last_read_msg_id, Some(7));
        coord.shutdown();
    }

    #[tokio::test]
    async fn role_resolution() {
        let coord = coordinator().await;
        assert_eq!(coord.role_in("r1"), Some(ActorRole::Freelancer));
        assert_eq!(coord.role_in("nope"), None);
        coord.shutdown();
    }
}
