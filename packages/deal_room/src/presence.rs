//! Presence Tracking
//!
//! Eventually-consistent online/offline view per user, driven exclusively by
//! a cold-start snapshot plus a live diff stream — no polling. A user whose
//! status has never been observed stays in phase `Unknown`, and callers must
//! treat that as "do not render a status", never as implicitly offline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Whether a user's status has ever been observed. The online flag is only
/// trusted once the phase is `Known`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PresencePhase {
    Unknown,
    Known,
}

/// Read view of one user's presence. `online` is `None` while the phase is
/// `Unknown` so a truly-online peer is never rendered offline before the
/// first snapshot arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceView {
    pub phase: PresencePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl PresenceView {
    fn unknown() -> Self {
        Self {
            phase: PresencePhase::Unknown,
            online: None,
            last_seen: None,
        }
    }
}

/// One entry of a presence snapshot, as served by the backend and carried
/// in `globalPresence` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshotItem {
    pub user_id: String,
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct PresenceEntry {
    online: bool,
    last_seen: Option<DateTime<Utc>>,
}

/// Phase-aware presence map. Mutated only from the dispatch task; read
/// concurrently through `query`/`snapshot` which copy out of the lock.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    users: RwLock<HashMap<String, PresenceEntry>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a point-in-time snapshot: every included user becomes `Known`.
    /// Used once after a channel join (and after rate-limited refreshes on
    /// reconnect).
    pub async fn apply_snapshot(&self, items: Vec<PresenceSnapshotItem>) {
        let mut users = self.users.write().await;
        for item in items {
            users.insert(
                item.user_id,
                PresenceEntry {
                    online: item.online,
                    last_seen: item.last_seen,
                },
            );
        }
    }

    /// Apply a join/leave diff. Idempotent: a repeated join or a leave for a
    /// user never observed is a no-op, never an error.
    pub async fn apply_diff(&self, joins: &[String], leaves: &[String]) {
        let now = Utc::now();
        let mut users = self.users.write().await;
        for user_id in joins {
            let entry = users.entry(user_id.clone()).or_insert(PresenceEntry {
                online: true,
                last_seen: None,
            });
            entry.online = true;
            entry.last_seen = Some(now);
        }
        for user_id in leaves {
            // Leave for an unknown user stays unknown — an offline diff is
            // not evidence we ever knew them.
            if let Some(entry) = users.get_mut(user_id) {
                entry.online = false;
                entry.last_seen = Some(now);
            }
        }
    }

    pub async fn query(&self, user_id: &str) -> PresenceView {
        match self.users.read().await.get(user_id) {
            Some(entry) => PresenceView {
                phase: PresencePhase::Known,
                online: Some(entry.online),
                last_seen: entry.last_seen,
            },
            None => PresenceView::unknown(),
        }
    }

    /// Views for a set of users, unknown ones included.
    pub async fn snapshot(&self, user_ids: &[String]) -> HashMap<String, PresenceView> {
        let users = self.users.read().await;
        user_ids
            .iter()
            .map(|id| {
                let view = match users.get(id) {
                    Some(entry) => PresenceView {
                        phase: PresencePhase::Known,
                        online: Some(entry.online),
                        last_seen: entry.last_seen,
                    },
                    None => PresenceView::unknown(),
                };
                (id.clone(), view)
            })
            .collect()
    }
}

/// Rate limiter for snapshot refetches after reconnect, so a flapping link
/// does not turn into a thundering herd of snapshot requests.
#[derive(Debug)]
pub struct SnapshotGate {
    min_interval: Duration,
    last: Option<Instant>,
}

impl SnapshotGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// Returns `true` if a fresh snapshot may be requested now, and records
    /// the request time. The first call always passes.
    pub fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
