//! Statuses, roles, and role-scoped actions with their payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Created,
    WaitForQuotation,
    QuotationPendingReview,
    OrderApproved,
    InProgress,
    PendingEmployerReview,
    Completed,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses accept no further actions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Created => "created",
            JobStatus::WaitForQuotation => "waitForQuotation",
            JobStatus::QuotationPendingReview => "quotationPendingReview",
            JobStatus::OrderApproved => "orderApproved",
            JobStatus::InProgress => "inProgress",
            JobStatus::PendingEmployerReview => "pendingEmployerReview",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Which side of the deal is acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActorRole {
    Employer,
    Freelancer,
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorRole::Employer => write!(f, "employer"),
            ActorRole::Freelancer => write!(f, "freelancer"),
        }
    }
}

/// Quotation terms attached to `submitQuotation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteTerms {
    pub amount_cents: u64,
    pub currency: String,
    pub delivery_days: u32,
}

/// Delivery artifacts attached to `submitDelivery`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryArtifacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Opaque references into the storage collaborator (upload ids, urls).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

/// One role-scoped action with its payload — one wire shape per action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum JobAction {
    SubmitQuotation {
        terms: QuoteTerms,
    },
    ApproveOrder,
    StartWork,
    SubmitDelivery {
        artifacts: DeliveryArtifacts,
    },
    RequestRevision {
        note: String,
    },
    ReleasePayment,
    Cancel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Restart,
}

impl JobAction {
    /// Wire name of the action, used in rejection messages.
    pub fn name(&self) -> &'static str {
        match self {
            JobAction::SubmitQuotation { .. } => "submitQuotation",
            JobAction::ApproveOrder => "approveOrder",
            JobAction::StartWork => "startWork",
            JobAction::SubmitDelivery { .. } => "submitDelivery",
            JobAction::RequestRevision { .. } => "requestRevision",
            JobAction::ReleasePayment => "releasePayment",
            JobAction::Cancel { .. } => "cancel",
            JobAction::Restart => "restart",
        }
    }

    /// Whether `role` is allowed to issue this action at all.
    /// `cancel` and `restart` are open to both sides; everything else is
    /// scoped to exactly one role.
    pub fn permits(&self, role: ActorRole) -> bool {
        match self {
            JobAction::SubmitQuotation { .. }
            | JobAction::StartWork
            | JobAction::SubmitDelivery { .. } => role == ActorRole::Freelancer,
            JobAction::ApproveOrder
            | JobAction::RequestRevision { .. }
            | JobAction::ReleasePayment => role == ActorRole::Employer,
            JobAction::Cancel { .. } | JobAction::Restart => true,
        }
    }

    /// Transition table: (current status, action) -> next status.
    ///
    /// `None` means the action is not valid in this status. `cancel` is
    /// accepted from every non-terminal status; `restart` returns an
    /// unapproved negotiation to `WaitForQuotation`.
    pub fn next_status(&self, from: JobStatus) -> Option<JobStatus> {
        use JobAction::*;
        use JobStatus::*;

        match (from, self) {
            (Created | WaitForQuotation, SubmitQuotation { .. }) => Some(QuotationPendingReview),
            (QuotationPendingReview, Restart) => Some(WaitForQuotation),
            (QuotationPendingReview, ApproveOrder) => Some(OrderApproved),
            (OrderApproved, StartWork) => Some(InProgress),
            (InProgress, SubmitDelivery { .. }) => Some(PendingEmployerReview),
            (PendingEmployerReview, RequestRevision { .. }) => Some(InProgress),
            (PendingEmployerReview, ReleasePayment) => Some(Completed),
            (from, Cancel { .. }) if !from.is_terminal() => Some(Cancelled),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote() -> JobAction {
        JobAction::SubmitQuotation {
            terms: QuoteTerms {
                amount_cents: 1000,
                currency: "USD".into(),
                delivery_days: 3,
            },
        }
    }

    #[test]
    fn roles_are_scoped() {
        assert!(quote().permits(ActorRole::Freelancer));
        assert!(!quote().permits(ActorRole::Employer));
        assert!(JobAction::ApproveOrder.permits(ActorRole::Employer));
        assert!(!JobAction::ApproveOrder.permits(ActorRole::Freelancer));
        assert!(JobAction::Cancel { reason: None }.permits(ActorRole::Employer));
        assert!(JobAction::Cancel { reason: None }.permits(ActorRole::Freelancer));
        assert!(JobAction::Restart.permits(ActorRole::Employer));
        assert!(JobAction::Restart.permits(ActorRole::Freelancer));
    }

    #[test]
    fn happy_path_chain() {
        let steps: [(JobStatus, JobAction, JobStatus); 5] = [
            (
                JobStatus::Created,
                quote(),
                JobStatus::QuotationPendingReview,
            ),
            (
                JobStatus::QuotationPendingReview,
                JobAction::ApproveOrder,
                JobStatus::OrderApproved,
            ),
            (
                JobStatus::OrderApproved,
                JobAction::StartWork,
                JobStatus::InProgress,
            ),
            (
                JobStatus::InProgress,
                JobAction::SubmitDelivery {
                    artifacts: DeliveryArtifacts {
                        note: None,
                        attachments: vec![],
                    },
                },
                JobStatus::PendingEmployerReview,
            ),
            (
                JobStatus::PendingEmployerReview,
                JobAction::ReleasePayment,
                JobStatus::Completed,
            ),
        ];
        for (from, action, to) in steps {
            assert_eq!(action.next_status(from), Some(to), "{} from {}", action.name(), from);
        }
    }

    #[test]
    fn revision_loops_back_to_in_progress() {
        let act = JobAction::RequestRevision {
            note: "wrong font".into(),
        };
        assert_eq!(
            act.next_status(JobStatus::PendingEmployerReview),
            Some(JobStatus::InProgress)
        );
    }

    #[test]
    fn cancel_reachable_from_every_non_terminal_status() {
        let cancel = JobAction::Cancel { reason: None };
        for status in [
            JobStatus::Created,
            JobStatus::WaitForQuotation,
            JobStatus::QuotationPendingReview,
            JobStatus::OrderApproved,
            JobStatus::InProgress,
            JobStatus::PendingEmployerReview,
        ] {
            assert_eq!(cancel.next_status(status), Some(JobStatus::Cancelled));
        }
    }

    #[test]
    fn terminal_statuses_absorb() {
        for status in [JobStatus::Completed, JobStatus::Cancelled] {
            assert_eq!(JobAction::Cancel { reason: None }.next_status(status), None);
            assert_eq!(JobAction::Restart.next_status(status), None);
            assert_eq!(quote().next_status(status), None);
        }
    }

    #[test]
    fn restart_reopens_quotation() {
        assert_eq!(
            JobAction::Restart.next_status(JobStatus::QuotationPendingReview),
            Some(JobStatus::WaitForQuotation)
        );
        // And the freelancer can quote again from there
        assert_eq!(
            quote().next_status(JobStatus::WaitForQuotation),
            Some(JobStatus::QuotationPendingReview)
        );
    }

    #[test]
    fn action_serde_is_tag_discriminated() {
        let json = serde_json::to_value(&JobAction::ApproveOrder).unwrap();
        assert_eq!(json["action"], "approveOrder");

        let json = serde_json::to_value(&quote()).unwrap();
        assert_eq!(json["action"], "submitQuotation");
        assert_eq!(json["terms"]["amountCents"], 1000);

        let rt: JobAction = serde_json::from_value(json).unwrap();
        assert_eq!(rt, quote());
    }

    #[test]
    fn status_serde_round_trip() {
        let json = serde_json::to_value(JobStatus::WaitForQuotation).unwrap();
        assert_eq!(json, "waitForQuotation");
        let rt: JobStatus = serde_json::from_value(json).unwrap();
        assert_eq!(rt, JobStatus::WaitForQuotation);
    }
}
