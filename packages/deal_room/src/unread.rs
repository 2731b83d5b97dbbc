//! Unread Ledger
//!
//! Per-room unread counters plus a global total. The invariant the whole
//! module exists for: the global total always equals the sum of the per-room
//! counters, after every operation. Every mutation path updates both inside
//! a single write-lock critical section.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Read snapshot of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadSnapshot {
    pub rooms: HashMap<String, u64>,
    pub total: u64,
}

#[derive(Debug, Default)]
struct LedgerState {
    rooms: HashMap<String, u64>,
    total: u64,
}

/// Unread tracking across rooms. Mutated only from the dispatch task and
/// the coordinator's active-room switch; read concurrently via `snapshot`.
#[derive(Debug, Default)]
pub struct UnreadLedger {
    inner: RwLock<LedgerState>,
}

impl UnreadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump a room's counter and the global total. Called when an inbound
    /// message arrives for a room that is not currently focused.
    pub async fn increment(&self, room_id: &str) -> u64 {
        let mut state = self.inner.write().await;
        let count = state.rooms.entry(room_id.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        state.total += 1;
        count
    }

    /// Zero a room's counter, decrementing the global total by the amount
    /// removed. Called when the room becomes the active/focused room.
    /// Returns the amount removed.
    pub async fn mark_seen(&self, room_id: &str) -> u64 {
        let mut state = self.inner.write().await;
        let removed = state.rooms.remove(room_id).unwrap_or(0);
        state.total -= removed;
        removed
    }

    /// Replace a room's counter with an authoritative recount derived from
    /// the server read marker. Server state wins over locally accumulated
    /// increments; callers pass a count already clamped at zero.
    pub async fn reconcile(&self, room_id: &str, authoritative: u64) {
        let mut state = self.inner.write().await;
        let prev = if authoritative == 0 {
            state.rooms.remove(room_id).unwrap_or(0)
        } else {
            state
                .rooms
                .insert(room_id.to_string(), authoritative)
                .unwrap_or(0)
        };
        state.total = state.total - prev + authoritative;
    }

    /// Bulk clear, used on logout or full resync.
    pub async fn clear_all(&self) {
        let mut state = self.inner.write().await;
        state.rooms.clear();
        state.total = 0;
    }

    pub async fn room_count(&self, room_id: &str) -> u64 {
        self.inner
            .read()
            .await
            .rooms
            .get(room_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn total(&self) -> u64 {
        self.inner.read().await.total
    }

    pub async fn snapshot(&self) -> UnreadSnapshot {
        let state = self.inner.read().await;
        UnreadSnapshot {
            rooms: state.rooms.clone(),
            total: state.total,
        }
    }
}
