//! Job Flow - Pure job lifecycle state machine library
//!
//! This crate models the lifecycle of a monetized job negotiated between an
//! employer and a freelancer inside a conversation room. It has no transport
//! dependencies and no async code: callers feed it role-scoped actions and
//! remote transition events, and it either produces a transition event or a
//! typed rejection.
//!
//! Every accepted transition bumps a gapless per-workflow sequence number,
//! which the realtime layer uses to detect stale commands and missed events.
//!
//! # Example
//!
//! ```
//! use job_flow::{ActorRole, JobAction, JobStatus, QuoteTerms, WorkflowEngine};
//!
//! let mut engine = WorkflowEngine::new("wf-1", "room-1");
//!
//! let quote = JobAction::SubmitQuotation {
//!     terms: QuoteTerms {
//!         amount_cents: 50_000,
//!         currency: "USD".to_string(),
//!         delivery_days: 7,
//!     },
//! };
//! let event = engine.apply(ActorRole::Freelancer, 0, quote).unwrap();
//! assert_eq!(event.to, JobStatus::QuotationPendingReview);
//! assert_eq!(engine.seq(), 1);
//! ```

mod action;
mod engine;
mod error;

pub use action::{ActorRole, DeliveryArtifacts, JobAction, JobStatus, QuoteTerms};
pub use engine::{TransitionEvent, WorkflowEngine, WorkflowSnapshot};
pub use error::WorkflowError;
