//! Rooms, messages, and read markers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use job_flow::WorkflowSnapshot;

/// One two-party conversation. A room may have no active job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub employer_id: String,
    pub freelancer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowSnapshot>,
}

impl Room {
    /// The other participant, or `None` if `user_id` is not in this room.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        if user_id == self.employer_id {
            Some(&self.freelancer_id)
        } else if user_id == self.freelancer_id {
            Some(&self.employer_id)
        } else {
            None
        }
    }
}

/// Two-phase delivery state of an optimistically sent message.
/// `Failed` may be retried back to `Pending`; nothing else moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

/// A chat message. `uuid` is caller-generated for optimistic send; the
/// server assigns `server_id` and `server_seq` on acknowledgment. Ordering
/// is by server sequence once acknowledged, by client timestamp while
/// pending.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_seq: Option<i64>,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
}

/// Authoritative last-read marker for one (room, user) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: String,
    pub room_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read_msg_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

/// Per-room message lists, mutated only from the dispatch task and the
/// coordinator's command surface, read concurrently via cloned snapshots.
#[derive(Debug, Default)]
pub struct MessageStore {
    rooms: RwLock<HashMap<String, Vec<Message>>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an optimistic local message (status `Pending`).
    pub async fn push_pending(&self, message: Message) {
        let mut rooms = self.rooms.write().await;
        let list = rooms.entry(message.room_id.clone()).or_default();
        list.push(message);
        sort_room(list);
    }

    /// Insert an inbound message. Returns `false` for duplicates (same
    /// server id or same uuid already present) — identifiers are unique per
    /// room.
    pub async fn insert_inbound(&self, message: Message) -> bool {
        let mut rooms = self.rooms.write().await;
        let list = rooms.entry(message.room_id.clone()).or_default();
        let duplicate = list.iter().any(|m| {
            m.uuid == message.uuid
                || (m.server_id.is_some() && m.server_id == message.server_id)
        });
        if duplicate {
            return false;
        }
        list.push(message);
        sort_room(list);
        true
    }

    /// Mark a pending message acknowledged: status `Sent`, server id and
    /// sequence recorded, list re-ordered. Returns the updated message.
    pub async fn confirm(
        &self,
        uuid: &str,
        server_id: i64,
        server_seq: i64,
    ) -> Option<Message> {
        let mut rooms = self.rooms.write().await;
        for list in rooms.values_mut() {
            if let Some(msg) = list.iter_mut().find(|m| m.uuid == uuid) {
                if msg.server_id.is_some() {
                    // Already acked — the server echo arrived second
                    return None;
                }
                msg.server_id = Some(server_id);
                msg.server_seq = Some(server_seq);
                msg.status = DeliveryStatus::Sent;
                let updated = msg.clone();
                sort_room(list);
                return Some(updated);
            }
        }
        None
    }

    /// Mark a pending message failed. Returns the updated message.
    pub async fn mark_failed(&self, uuid: &str) -> Option<Message> {
        self.set_status(uuid, DeliveryStatus::Failed).await
    }

    /// Move a failed message back to pending for a retry. Returns `None`
    /// if the message is not currently failed.
    pub async fn mark_retrying(&self, uuid: &str) -> Option<Message> {
        let mut rooms = self.rooms.write().await;
        for list in rooms.values_mut() {
            if let Some(msg) = list.iter_mut().find(|m| m.uuid == uuid) {
                if msg.status != DeliveryStatus::Failed {
                    return None;
                }
                msg.status = DeliveryStatus::Pending;
                return Some(msg.clone());
            }
        }
        None
    }

    async fn set_status(&self, uuid: &str, status: DeliveryStatus) -> Option<Message> {
        let mut rooms = self.rooms.write().await;
        for list in rooms.values_mut() {
            if let Some(msg) = list.iter_mut().find(|m| m.uuid == uuid) {
                msg.status = status;
                return Some(msg.clone());
            }
        }
        None
    }

    /// Messages for a room, ordered (snapshot copy).
    pub async fn room_messages(&self, room_id: &str) -> Vec<Message> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Count of acknowledged messages newer than `last_read_msg_id` not
    /// authored by `exclude_sender` — the authoritative unread derivation.
    /// A marker for an id never observed locally simply counts everything
    /// known to be newer; the result is clamped at zero by construction.
    pub async fn unread_after(
        &self,
        room_id: &str,
        last_read_msg_id: Option<i64>,
        exclude_sender: &str,
    ) -> u64 {
        let rooms = self.rooms.read().await;
        let Some(list) = rooms.get(room_id) else {
            return 0;
        };
        list.iter()
            .filter(|m| m.sender_id != exclude_sender)
            .filter(|m| match (m.server_id, last_read_msg_id) {
                (Some(id), Some(marker)) => id > marker,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .count() as u64
    }

    /// Highest acknowledged server sequence seen for a room, 0 if none.
    /// Sent on rejoin so the server can replay what was missed.
    pub async fn max_server_seq(&self, room_id: &str) -> i64 {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|list| list.iter().filter_map(|m| m.server_seq).max().unwrap_or(0))
            .unwrap_or(0)
    }
}

/// Acked messages by server sequence first, pending ones after by client
/// timestamp.
fn sort_room(list: &mut [Message]) {
    list.sort_by_key(|m| match m.server_seq {
        Some(seq) => (0u8, seq, m.created_at),
        None => (1u8, 0, m.created_at),
    });
}
