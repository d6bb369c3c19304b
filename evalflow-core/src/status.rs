//! Workflow status vocabulary.
//!
//! The status names are wire-visible and must stay exactly as written here;
//! existing automation is built against them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an evaluation record.
///
/// `Draft` is the initial status. `Approved` has no outgoing transition;
/// `Rejected` can re-enter the cycle via resubmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Draft,
    PendingReview,
    InReview,
    PendingApproval,
    Approved,
    Rejected,
}

impl WorkflowStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [WorkflowStatus; 6] = [
        WorkflowStatus::Draft,
        WorkflowStatus::PendingReview,
        WorkflowStatus::InReview,
        WorkflowStatus::PendingApproval,
        WorkflowStatus::Approved,
        WorkflowStatus::Rejected,
    ];

    /// The wire name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::PendingReview => "PENDING_REVIEW",
            Self::InReview => "IN_REVIEW",
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    /// Human-readable label for display.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::PendingReview => "Pending Review",
            Self::InReview => "In Review",
            Self::PendingApproval => "Pending Approval",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        }
    }

    /// Parse a wire name back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|status| status.as_str() == s)
    }

    /// Returns true for the two statuses where review work happens.
    pub fn is_review_state(&self) -> bool {
        matches!(self, Self::PendingReview | Self::InReview)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
