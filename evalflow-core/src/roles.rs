//! Role and permission model.
//!
//! All functions here are pure predicates over `(user, record)` pairs; there
//! is no I/O. The same predicates gate both UI affordances (via
//! [`available_actions`]) and server-side enforcement, so the two cannot
//! drift. The transition graph is a single const table rather than scattered
//! conditionals, which keeps it reviewable and exhaustively enumerable in
//! tests.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::record::{EvaluationRecord, User};
use crate::status::WorkflowStatus;

/// Closed role enumeration. Role names are wire-visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Creator,
    Reviewer,
    Approver,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Admin,
        Role::Creator,
        Role::Reviewer,
        Role::Approver,
        Role::Viewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Creator => "CREATOR",
            Self::Reviewer => "REVIEWER",
            Self::Approver => "APPROVER",
            Self::Viewer => "VIEWER",
        }
    }

    /// Human-readable role name.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Admin => "Administrator",
            Self::Creator => "Evaluation Creator",
            Self::Reviewer => "Evaluation Reviewer",
            Self::Approver => "Evaluation Approver",
            Self::Viewer => "Evaluation Viewer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|role| role.as_str() == s)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Action tokens a caller can take on a record. Wire-visible vocabulary.
///
/// The last five are workflow transitions handled by the transition engine;
/// `view`/`edit`/`delete` are gated directly by the predicates below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    View,
    Edit,
    Delete,
    Submit,
    Recall,
    MarkReviewed,
    Approve,
    Reject,
}

impl WorkflowAction {
    pub const ALL: [WorkflowAction; 8] = [
        WorkflowAction::View,
        WorkflowAction::Edit,
        WorkflowAction::Delete,
        WorkflowAction::Submit,
        WorkflowAction::Recall,
        WorkflowAction::MarkReviewed,
        WorkflowAction::Approve,
        WorkflowAction::Reject,
    ];

    /// The five actions that drive a status transition.
    pub const TRANSITIONS: [WorkflowAction; 5] = [
        WorkflowAction::Submit,
        WorkflowAction::Recall,
        WorkflowAction::MarkReviewed,
        WorkflowAction::Approve,
        WorkflowAction::Reject,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::Submit => "submit",
            Self::Recall => "recall",
            Self::MarkReviewed => "mark_reviewed",
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|action| action.as_str() == s)
    }

    /// Returns true if this action is a workflow transition.
    pub fn is_transition(&self) -> bool {
        Self::TRANSITIONS.contains(self)
    }
}

impl fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One legal edge in the workflow transition graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
    pub roles: &'static [Role],
}

/// The complete workflow transition graph.
///
/// `PENDING_REVIEW -> IN_REVIEW` has no dedicated action token: it is taken
/// when a reviewer (or admin) starts editing a pending record. Resubmission
/// after rejection goes straight back to `PENDING_REVIEW` via `submit`.
pub const TRANSITION_TABLE: &[TransitionRule] = &[
    TransitionRule {
        from: WorkflowStatus::Draft,
        to: WorkflowStatus::PendingReview,
        roles: &[Role::Creator, Role::Admin],
    },
    TransitionRule {
        from: WorkflowStatus::PendingReview,
        to: WorkflowStatus::InReview,
        roles: &[Role::Reviewer, Role::Admin],
    },
    TransitionRule {
        from: WorkflowStatus::PendingReview,
        to: WorkflowStatus::PendingApproval,
        roles: &[Role::Reviewer, Role::Admin],
    },
    TransitionRule {
        from: WorkflowStatus::PendingReview,
        to: WorkflowStatus::Draft,
        roles: &[Role::Creator, Role::Admin],
    },
    TransitionRule {
        from: WorkflowStatus::InReview,
        to: WorkflowStatus::PendingApproval,
        roles: &[Role::Reviewer, Role::Admin],
    },
    TransitionRule {
        from: WorkflowStatus::InReview,
        to: WorkflowStatus::Draft,
        roles: &[Role::Creator, Role::Admin],
    },
    TransitionRule {
        from: WorkflowStatus::PendingApproval,
        to: WorkflowStatus::Approved,
        roles: &[Role::Approver, Role::Admin],
    },
    TransitionRule {
        from: WorkflowStatus::PendingApproval,
        to: WorkflowStatus::Rejected,
        roles: &[Role::Approver, Role::Admin],
    },
    TransitionRule {
        from: WorkflowStatus::Rejected,
        to: WorkflowStatus::PendingReview,
        roles: &[Role::Creator, Role::Admin],
    },
];

/// Table lookup: may `role` move a record from `from` to `to`?
pub fn can_transition(from: WorkflowStatus, to: WorkflowStatus, role: Role) -> bool {
    TRANSITION_TABLE
        .iter()
        .any(|rule| rule.from == from && rule.to == to && rule.roles.contains(&role))
}

pub fn has_role(user: &User, role: Role) -> bool {
    user.role == role
}

pub fn is_admin(user: &User) -> bool {
    has_role(user, Role::Admin)
}

/// Only creators and admins may create evaluations.
pub fn can_create(user: &User) -> bool {
    is_admin(user) || has_role(user, Role::Creator)
}

/// Read access: admins and viewers see everything, creators see their own,
/// reviewers see review-state records or ones assigned to them, approvers
/// see approval-state records or ones assigned to them.
pub fn can_view(user: &User, record: &EvaluationRecord) -> bool {
    if is_admin(user) || has_role(user, Role::Viewer) {
        return true;
    }
    if record.creator_id == user.id {
        return true;
    }
    if has_role(user, Role::Reviewer) {
        if record.reviewer_id == Some(user.id) {
            return true;
        }
        if record.status.is_review_state() {
            return true;
        }
    }
    if has_role(user, Role::Approver) {
        if record.approver_id == Some(user.id) {
            return true;
        }
        if record.status == WorkflowStatus::PendingApproval {
            return true;
        }
    }
    false
}

/// Write access to the payload. Approved records are immutable.
pub fn can_edit(user: &User, record: &EvaluationRecord) -> bool {
    if has_role(user, Role::Viewer) {
        return false;
    }
    if is_admin(user) {
        return record.status != WorkflowStatus::Approved;
    }
    if has_role(user, Role::Creator) && record.creator_id == user.id {
        return matches!(
            record.status,
            WorkflowStatus::Draft | WorkflowStatus::Rejected
        );
    }
    if has_role(user, Role::Reviewer) {
        return record.status.is_review_state();
    }
    false
}

/// Deletion. Admin deletion of APPROVED records is a deliberate cleanup
/// escape hatch; everything else is drafts only.
pub fn can_delete(user: &User, record: &EvaluationRecord) -> bool {
    if has_role(user, Role::Viewer) {
        return false;
    }
    if is_admin(user) {
        return matches!(
            record.status,
            WorkflowStatus::Draft | WorkflowStatus::Approved
        );
    }
    if has_role(user, Role::Creator) && record.creator_id == user.id {
        return record.status == WorkflowStatus::Draft;
    }
    false
}

/// May `user` perform `action` on `record` right now?
///
/// For transition actions this combines the role/ownership gate with the
/// source-status check; the transition engine performs the same checks with
/// distinct error kinds.
pub fn can_perform(user: &User, record: &EvaluationRecord, action: WorkflowAction) -> bool {
    let owner_or_admin =
        is_admin(user) || (has_role(user, Role::Creator) && record.creator_id == user.id);
    match action {
        WorkflowAction::View => can_view(user, record),
        WorkflowAction::Edit => can_edit(user, record),
        WorkflowAction::Delete => can_delete(user, record),
        WorkflowAction::Submit => {
            owner_or_admin
                && matches!(
                    record.status,
                    WorkflowStatus::Draft | WorkflowStatus::Rejected
                )
        }
        WorkflowAction::Recall => owner_or_admin && record.status.is_review_state(),
        WorkflowAction::MarkReviewed => {
            (is_admin(user) || has_role(user, Role::Reviewer)) && record.status.is_review_state()
        }
        WorkflowAction::Approve | WorkflowAction::Reject => {
            (is_admin(user) || has_role(user, Role::Approver))
                && record.status == WorkflowStatus::PendingApproval
        }
    }
}

/// The deduplicated set of action tokens valid for this caller on this
/// record right now. A VIEWER always gets exactly `[view]`.
pub fn available_actions(user: &User, record: &EvaluationRecord) -> Vec<WorkflowAction> {
    WorkflowAction::ALL
        .iter()
        .copied()
        .filter(|action| can_perform(user, record, *action))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EvaluationPayload, RecordId, UserId};
    use chrono::Utc;

    fn user(id: i64, role: Role) -> User {
        User {
            id: UserId(id),
            email: format!("user{}@example.com", id),
            name: format!("User {}", id),
            role,
        }
    }

    fn record(creator: i64, status: WorkflowStatus) -> EvaluationRecord {
        let now = Utc::now();
        EvaluationRecord {
            id: RecordId(1),
            ite_number: "ITE-2026-001".into(),
            year: 2026,
            running_number: 1,
            status,
            creator_id: UserId(creator),
            reviewer_id: None,
            approver_id: None,
            submitted_at: None,
            reviewed_at: None,
            approved_at: None,
            rejected_at: None,
            rejection_reason: None,
            payload: EvaluationPayload::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_viewer_is_read_only_in_every_status() {
        let viewer = user(99, Role::Viewer);
        for status in WorkflowStatus::ALL {
            let rec = record(1, status);
            assert!(can_view(&viewer, &rec), "viewer must see {}", status);
            assert!(!can_edit(&viewer, &rec), "viewer must not edit {}", status);
            assert!(!can_delete(&viewer, &rec));
            assert_eq!(available_actions(&viewer, &rec), vec![WorkflowAction::View]);
        }
    }

    #[test]
    fn test_creator_sees_only_own_records() {
        let creator = user(1, Role::Creator);
        assert!(can_view(&creator, &record(1, WorkflowStatus::Draft)));
        assert!(!can_view(&creator, &record(2, WorkflowStatus::Draft)));
    }

    #[test]
    fn test_reviewer_visibility() {
        let reviewer = user(5, Role::Reviewer);
        assert!(can_view(&reviewer, &record(1, WorkflowStatus::PendingReview)));
        assert!(can_view(&reviewer, &record(1, WorkflowStatus::InReview)));
        assert!(!can_view(&reviewer, &record(1, WorkflowStatus::Draft)));

        let mut assigned = record(1, WorkflowStatus::Approved);
        assigned.reviewer_id = Some(UserId(5));
        assert!(can_view(&reviewer, &assigned));
    }

    #[test]
    fn test_approver_visibility() {
        let approver = user(7, Role::Approver);
        assert!(can_view(
            &approver,
            &record(1, WorkflowStatus::PendingApproval)
        ));
        assert!(!can_view(&approver, &record(1, WorkflowStatus::Draft)));

        let mut assigned = record(1, WorkflowStatus::Rejected);
        assigned.approver_id = Some(UserId(7));
        assert!(can_view(&approver, &assigned));
    }

    #[test]
    fn test_admin_cannot_edit_approved() {
        let admin = user(1, Role::Admin);
        assert!(can_edit(&admin, &record(2, WorkflowStatus::Rejected)));
        assert!(!can_edit(&admin, &record(2, WorkflowStatus::Approved)));
    }

    #[test]
    fn test_admin_delete_is_draft_or_approved_only() {
        let admin = user(1, Role::Admin);
        assert!(can_delete(&admin, &record(2, WorkflowStatus::Draft)));
        assert!(can_delete(&admin, &record(2, WorkflowStatus::Approved)));
        assert!(!can_delete(&admin, &record(2, WorkflowStatus::PendingReview)));
        assert!(!can_delete(&admin, &record(2, WorkflowStatus::Rejected)));
    }

    #[test]
    fn test_creator_edit_delete_windows() {
        let creator = user(1, Role::Creator);
        assert!(can_edit(&creator, &record(1, WorkflowStatus::Draft)));
        assert!(can_edit(&creator, &record(1, WorkflowStatus::Rejected)));
        assert!(!can_edit(&creator, &record(1, WorkflowStatus::PendingReview)));
        assert!(can_delete(&creator, &record(1, WorkflowStatus::Draft)));
        assert!(!can_delete(&creator, &record(1, WorkflowStatus::Rejected)));
        // Someone else's record.
        assert!(!can_edit(&creator, &record(2, WorkflowStatus::Draft)));
        assert!(!can_delete(&creator, &record(2, WorkflowStatus::Draft)));
    }

    #[test]
    fn test_transition_table_lookup() {
        use WorkflowStatus::*;
        assert!(can_transition(Draft, PendingReview, Role::Creator));
        assert!(can_transition(Draft, PendingReview, Role::Admin));
        assert!(!can_transition(Draft, PendingReview, Role::Reviewer));
        assert!(can_transition(PendingReview, InReview, Role::Reviewer));
        assert!(can_transition(PendingApproval, Approved, Role::Approver));
        assert!(can_transition(PendingApproval, Rejected, Role::Approver));
        assert!(can_transition(Rejected, PendingReview, Role::Creator));
        // Approved is absorbing.
        for to in WorkflowStatus::ALL {
            for role in Role::ALL {
                assert!(!can_transition(Approved, to, role));
            }
        }
        // No edge skips the graph.
        assert!(!can_transition(Draft, Approved, Role::Admin));
        assert!(!can_transition(Draft, PendingApproval, Role::Admin));
    }

    #[test]
    fn test_available_actions_owner_draft() {
        let creator = user(1, Role::Creator);
        let actions = available_actions(&creator, &record(1, WorkflowStatus::Draft));
        assert_eq!(
            actions,
            vec![
                WorkflowAction::View,
                WorkflowAction::Edit,
                WorkflowAction::Delete,
                WorkflowAction::Submit,
            ]
        );
    }

    #[test]
    fn test_available_actions_owner_rejected() {
        let creator = user(1, Role::Creator);
        let actions = available_actions(&creator, &record(1, WorkflowStatus::Rejected));
        assert_eq!(
            actions,
            vec![
                WorkflowAction::View,
                WorkflowAction::Edit,
                WorkflowAction::Submit,
            ]
        );
    }

    #[test]
    fn test_available_actions_reviewer_pending() {
        let reviewer = user(5, Role::Reviewer);
        let actions = available_actions(&reviewer, &record(1, WorkflowStatus::PendingReview));
        assert_eq!(
            actions,
            vec![
                WorkflowAction::View,
                WorkflowAction::Edit,
                WorkflowAction::MarkReviewed,
            ]
        );
    }

    #[test]
    fn test_available_actions_approver_pending_approval() {
        let approver = user(7, Role::Approver);
        let actions = available_actions(&approver, &record(1, WorkflowStatus::PendingApproval));
        assert_eq!(
            actions,
            vec![
                WorkflowAction::View,
                WorkflowAction::Approve,
                WorkflowAction::Reject,
            ]
        );
    }

    #[test]
    fn test_action_tokens_round_trip() {
        for action in WorkflowAction::ALL {
            assert_eq!(WorkflowAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(
            serde_json::to_string(&WorkflowAction::MarkReviewed).unwrap(),
            "\"mark_reviewed\""
        );
    }
}
