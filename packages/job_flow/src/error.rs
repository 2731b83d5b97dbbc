use crate::action::{ActorRole, JobStatus};

/// Typed rejections produced by the workflow engine.
///
/// None of these tear down a session: `InvalidTransition` is surfaced as a
/// disabled action, `StaleSequence` as refetch-and-retry, and `SequenceGap`
/// as a forced resync. The engine never mutates state when it rejects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    /// The (status, role, action) triple has no entry in the transition table.
    #[error("{role} may not {action} while the job is {status}")]
    InvalidTransition {
        status: JobStatus,
        role: ActorRole,
        action: &'static str,
    },

    /// Optimistic-concurrency conflict: the caller's expected sequence number
    /// does not match the engine's current one (e.g. both ends raced to
    /// transition, or a duplicate command was replayed).
    #[error("stale sequence number: expected {expected}, got {got}")]
    StaleSequence { expected: u64, got: u64 },

    /// A remote transition arrived more than one step ahead of local state.
    /// Intermediate events were missed; the caller must refetch the workflow
    /// rather than let the engine guess the skipped states.
    #[error("sequence gap: local seq {local}, remote seq {remote}")]
    SequenceGap { local: u64, remote: u64 },
}
