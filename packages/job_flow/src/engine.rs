//! Sequence-checked workflow engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::{ActorRole, JobAction, JobStatus};
use crate::error::WorkflowError;

/// One accepted transition, produced locally for transmission and emitted to
/// observers when a remote transition is adopted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEvent {
    pub workflow_id: String,
    pub room_id: String,
    pub from: JobStatus,
    pub to: JobStatus,
    /// Sequence number *after* the transition (gapless, starts at 1).
    pub seq: u64,
    pub actor: ActorRole,
    #[serde(flatten)]
    pub action: JobAction,
    pub at: DateTime<Utc>,
}

/// Authoritative point-in-time view of a workflow, used to seed an engine
/// and to recover from a sequence gap. The server defines richer payloads;
/// status and sequence are all the engine needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSnapshot {
    pub workflow_id: String,
    pub room_id: String,
    pub status: JobStatus,
    pub seq: u64,
}

/// Strict state machine over one job's lifecycle.
///
/// Invalid transitions are rejected before they reach the transport, and the
/// engine never mutates state on rejection. Every accepted transition
/// increments the sequence number by exactly 1.
#[derive(Debug, Clone)]
pub struct WorkflowEngine {
    workflow_id: String,
    room_id: String,
    status: JobStatus,
    seq: u64,
    /// Role-tagged metadata per accepted transition, newest last.
    history: Vec<TransitionEvent>,
}

impl WorkflowEngine {
    pub fn new(workflow_id: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            room_id: room_id.into(),
            status: JobStatus::Created,
            seq: 0,
            history: Vec::new(),
        }
    }

    pub fn from_snapshot(snapshot: WorkflowSnapshot) -> Self {
        Self {
            workflow_id: snapshot.workflow_id,
            room_id: snapshot.room_id,
            status: snapshot.status,
            seq: snapshot.seq,
            history: Vec::new(),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn history(&self) -> &[TransitionEvent] {
        &self.history
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            workflow_id: self.workflow_id.clone(),
            room_id: self.room_id.clone(),
            status: self.status,
            seq: self.seq,
        }
    }

    /// Validate an action without mutating state — the fail-fast check the
    /// bridge runs before a command is ever serialized. Returns the status
    /// the action would move to.
    pub fn check(&self, role: ActorRole, action: &JobAction) -> Result<JobStatus, WorkflowError> {
        if !action.permits(role) {
            return Err(WorkflowError::InvalidTransition {
                status: self.status,
                role,
                action: action.name(),
            });
        }
        action
            .next_status(self.status)
            .ok_or(WorkflowError::InvalidTransition {
                status: self.status,
                role,
                action: action.name(),
            })
    }

    /// Apply a local action carrying the caller's expected sequence number.
    ///
    /// The sequence guard runs first: a raced or replayed command is
    /// reported as `StaleSequence` even when its action would also be
    /// invalid in the current status, because "the workflow moved under
    /// you" is what the caller needs to hear, not "this action is illegal".
    /// With the sequence current, a (status, role, action) triple without a
    /// table entry is `InvalidTransition`.
    pub fn apply(
        &mut self,
        role: ActorRole,
        expected_seq: u64,
        action: JobAction,
    ) -> Result<TransitionEvent, WorkflowError> {
        if expected_seq != self.seq {
            return Err(WorkflowError::StaleSequence {
                expected: self.seq,
                got: expected_seq,
            });
        }
        let to = self.check(role, &action)?;

        let event = TransitionEvent {
            workflow_id: self.workflow_id.clone(),
            room_id: self.room_id.clone(),
            from: self.status,
            to,
            seq: self.seq + 1,
            actor: role,
            action,
            at: Utc::now(),
        };
        self.status = to;
        self.seq += 1;
        self.history.push(event.clone());
        Ok(event)
    }

    /// Adopt a transition produced by the remote side.
    ///
    /// Accepts exactly the next sequence number. An old or duplicate event
    /// is `StaleSequence` (drop it); an event more than one step ahead is
    /// `SequenceGap` — the caller must refetch the workflow, the engine does
    /// not guess intermediate states.
    pub fn apply_remote(&mut self, event: &TransitionEvent) -> Result<(), WorkflowError> {
        if event.seq <= self.seq {
            return Err(WorkflowError::StaleSequence {
                expected: self.seq + 1,
                got: event.seq,
            });
        }
        if event.seq > self.seq + 1 {
            return Err(WorkflowError::SequenceGap {
                local: self.seq,
                remote: event.seq,
            });
        }
        self.status = event.to;
        self.seq = event.seq;
        self.history.push(event.clone());
        Ok(())
    }

    /// Replace status and sequence from an authoritative refetch.
    /// History accumulated before the gap is kept; skipped transitions are
    /// simply absent from it.
    pub fn resync(&mut self, snapshot: &WorkflowSnapshot) {
        self.status = snapshot.status;
        self.seq = snapshot.seq;
    }
}
