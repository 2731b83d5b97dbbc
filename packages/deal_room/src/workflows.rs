//! Lock-fronted collection of workflow engines, one per active job.

use std::collections::HashMap;
use tokio::sync::RwLock;

use job_flow::{
    ActorRole, JobAction, JobStatus, TransitionEvent, WorkflowEngine, WorkflowError,
    WorkflowSnapshot,
};

#[derive(Debug, Default)]
struct Inner {
    by_id: HashMap<String, WorkflowEngine>,
    room_to_workflow: HashMap<String, String>,
}

/// The engines owned by one session. All mutation happens on the dispatch
/// task or under the coordinator's command surface; reads copy snapshots
/// out of the lock.
#[derive(Debug, Default)]
pub struct WorkflowSet {
    inner: RwLock<Inner>,
}

impl WorkflowSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, snapshot: WorkflowSnapshot) {
        let mut inner = self.inner.write().await;
        inner
            .room_to_workflow
            .insert(snapshot.room_id.clone(), snapshot.workflow_id.clone());
        inner.by_id.insert(
            snapshot.workflow_id.clone(),
            WorkflowEngine::from_snapshot(snapshot),
        );
    }

    /// Fail-fast validation for a room's workflow: returns the workflow id
    /// and the expected sequence number to stamp on the outbound command.
    pub async fn check(
        &self,
        room_id: &str,
        role: ActorRole,
        action: &JobAction,
    ) -> Option<Result<(String, u64, JobStatus), WorkflowError>> {
        let inner = self.inner.read().await;
        let workflow_id = inner.room_to_workflow.get(room_id)?;
        let engine = inner.by_id.get(workflow_id)?;
        Some(
            engine
                .check(role, action)
                .map(|next| (workflow_id.clone(), engine.seq(), next)),
        )
    }

    /// Apply a locally issued action after the transport acknowledged it.
    pub async fn apply_local(
        &self,
        workflow_id: &str,
        role: ActorRole,
        expected_seq: u64,
        action: JobAction,
    ) -> Option<Result<TransitionEvent, WorkflowError>> {
        let mut inner = self.inner.write().await;
        let engine = inner.by_id.get_mut(workflow_id)?;
        Some(engine.apply(role, expected_seq, action))
    }

    /// Adopt a remote transition. `None` for a workflow this session does
    /// not hold.
    pub async fn apply_remote(
        &self,
        event: &TransitionEvent,
    ) -> Option<Result<(), WorkflowError>> {
        let mut inner = self.inner.write().await;
        let engine = inner.by_id.get_mut(&event.workflow_id)?;
        Some(engine.apply_remote(event))
    }

    pub async fn resync(&self, snapshot: &WorkflowSnapshot) -> bool {
        let mut inner = self.inner.write().await;
        match inner.by_id.get_mut(&snapshot.workflow_id) {
            Some(engine) => {
                engine.resync(snapshot);
                true
            }
            None => false,
        }
    }

    pub async fn snapshot_for_room(&self, room_id: &str) -> Option<WorkflowSnapshot> {
        let inner = self.inner.read().await;
        let workflow_id = inner.room_to_workflow.get(room_id)?;
        inner.by_id.get(workflow_id).map(|e| e.snapshot())
    }

    pub async fn snapshots(&self) -> Vec<WorkflowSnapshot> {
        self.inner
            .read()
            .await
            .by_id
            .values()
            .map(|e| e.snapshot())
            .collect()
    }
}
