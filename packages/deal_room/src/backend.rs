//! HTTP collaborator client.
//!
//! The storage/backend service is an external collaborator: messages and
//! workflow records persist there, and this layer only reads the seeds it
//! needs — last-read markers, presence snapshots, and workflow refetches
//! after a sequence gap.

use serde::Deserialize;

use job_flow::WorkflowSnapshot;

use crate::error::SessionError;
use crate::models::ReadReceipt;
use crate::presence::PresenceSnapshotItem;

/// Seam over the HTTP collaborator so the dispatch and resync paths can be
/// exercised against a fake in tests.
pub trait Backend: Send + Sync + 'static {
    /// Authoritative last-read marker for the local user in a room.
    fn last_read(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> impl Future<Output = Result<ReadReceipt, SessionError>> + Send;

    /// Point-in-time presence for a set of users; seeds the tracker on join.
    fn presence_snapshot(
        &self,
        user_ids: &[String],
    ) -> impl Future<Output = Result<Vec<PresenceSnapshotItem>, SessionError>> + Send;

    /// Full workflow refetch, used to recover from a sequence gap.
    fn fetch_workflow(
        &self,
        workflow_id: &str,
    ) -> impl Future<Output = Result<WorkflowSnapshot, SessionError>> + Send;
}

/// Production backend speaking JSON over reqwest.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    items: Vec<PresenceSnapshotItem>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Backend for HttpBackend {
    async fn last_read(&self, room_id: &str, user_id: &str) -> Result<ReadReceipt, SessionError> {
        let url = format!("{}/rooms/{}/last-read", self.base_url, room_id);
        let receipt = self
            .client
            .get(&url)
            .query(&[("userId", user_id)])
            .send()
            .await?
            .error_for_status()?
            .json::<ReadReceipt>()
            .await?;
        Ok(receipt)
    }

    async fn presence_snapshot(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<PresenceSnapshotItem>, SessionError> {
        let url = format!("{}/presence/snapshot", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("userIds", user_ids.join(","))])
            .send()
            .await?
            .error_for_status()?
            .json::<SnapshotResponse>()
            .await?;
        Ok(resp.items)
    }

    async fn fetch_workflow(&self, workflow_id: &str) -> Result<WorkflowSnapshot, SessionError> {
        let url = format!("{}/workflows/{}", self.base_url, workflow_id);
        let snapshot = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<WorkflowSnapshot>()
            .await?;
        Ok(snapshot)
    }
}
