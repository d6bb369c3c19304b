//! Pure transition planning.
//!
//! [`plan_transition`] is the core of the workflow engine: given the caller,
//! the current record, and the requested action, it either produces a
//! [`TransitionPlan`] (new status plus a [`RecordPatch`]) or a typed error.
//! It has NO side effects; the server crate persists the plan and appends
//! the audit entry.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::audit::AuditAction;
use crate::error::WorkflowError;
use crate::record::{EvaluationRecord, RecordPatch, User, UserId};
use crate::roles::{can_transition, has_role, is_admin, Role, WorkflowAction};
use crate::status::WorkflowStatus;

/// A requested workflow action with its optional parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    pub action: WorkflowAction,
    /// Free text; required (non-empty) for `reject`.
    #[serde(default)]
    pub comment: Option<String>,
    /// Explicit reviewer assignment; takes precedence over self-assignment.
    #[serde(default)]
    pub reviewer_id: Option<UserId>,
    /// Explicit approver assignment; takes precedence over self-assignment.
    #[serde(default)]
    pub approver_id: Option<UserId>,
}

impl TransitionRequest {
    pub fn new(action: WorkflowAction) -> Self {
        Self {
            action,
            comment: None,
            reviewer_id: None,
            approver_id: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// The validated outcome of planning a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    pub action: WorkflowAction,
    pub audit_action: AuditAction,
    pub old_status: WorkflowStatus,
    pub new_status: WorkflowStatus,
    pub patch: RecordPatch,
    /// Comment to carry into the audit entry (trimmed for rejections).
    pub comment: Option<String>,
}

/// Self-assignment as an explicit fill-if-absent merge: an explicit id from
/// the request always wins, an existing assignment is never overwritten,
/// and only a fully unset field falls back to the acting user.
///
/// Returns the id to set, or `None` to leave the field unchanged.
fn fill_if_absent(
    current: Option<UserId>,
    explicit: Option<UserId>,
    actor: UserId,
) -> Option<UserId> {
    match (explicit, current) {
        (Some(id), _) => Some(id),
        (None, None) => Some(actor),
        (None, Some(_)) => None,
    }
}

/// ValidationError naming the current status and the legal source states.
fn expect_source(
    current: WorkflowStatus,
    expected: &[WorkflowStatus],
    action: WorkflowAction,
) -> Result<(), WorkflowError> {
    if expected.contains(&current) {
        return Ok(());
    }
    let expected = expected
        .iter()
        .map(|status| status.as_str())
        .collect::<Vec<_>>()
        .join(" or ");
    Err(WorkflowError::validation(format!(
        "cannot {} an evaluation in status {}: expected {}",
        action, current, expected
    )))
}

fn require_creator_of(user: &User, record: &EvaluationRecord, verb: &str) -> Result<(), WorkflowError> {
    if is_admin(user) {
        return Ok(());
    }
    if !has_role(user, Role::Creator) {
        return Err(WorkflowError::forbidden(format!(
            "only creators can {} evaluations",
            verb
        )));
    }
    if record.creator_id != user.id {
        return Err(WorkflowError::forbidden(format!(
            "you can only {} your own evaluations",
            verb
        )));
    }
    Ok(())
}

fn require_role(user: &User, role: Role, reason: &str) -> Result<(), WorkflowError> {
    if is_admin(user) || has_role(user, role) {
        Ok(())
    } else {
        Err(WorkflowError::forbidden(reason))
    }
}

/// Validate and plan a workflow transition.
///
/// Performs, in order: the action-level role/ownership check, the
/// source-status check, action-specific input validation, patch computation,
/// and a final lookup of the computed edge against the transition table.
pub fn plan_transition(
    user: &User,
    record: &EvaluationRecord,
    request: &TransitionRequest,
    now: DateTime<Utc>,
) -> Result<TransitionPlan, WorkflowError> {
    let old_status = record.status;
    let mut comment = request.comment.clone();

    let (new_status, audit_action, patch) = match request.action {
        WorkflowAction::Submit => {
            require_creator_of(user, record, "submit")?;
            expect_source(
                old_status,
                &[WorkflowStatus::Draft, WorkflowStatus::Rejected],
                request.action,
            )?;
            let patch = RecordPatch {
                status: Some(WorkflowStatus::PendingReview),
                submitted_at: Some(Some(now)),
                // Each submission starts a fresh review cycle: stale
                // rejection context and any previous reviewer assignment
                // must not carry over.
                rejected_at: Some(None),
                rejection_reason: Some(None),
                reviewer_id: Some(request.reviewer_id),
                ..Default::default()
            };
            (WorkflowStatus::PendingReview, AuditAction::Submit, patch)
        }
        WorkflowAction::Recall => {
            require_creator_of(user, record, "recall")?;
            expect_source(
                old_status,
                &[WorkflowStatus::PendingReview, WorkflowStatus::InReview],
                request.action,
            )?;
            let patch = RecordPatch {
                status: Some(WorkflowStatus::Draft),
                reviewer_id: Some(None),
                reviewed_at: Some(None),
                ..Default::default()
            };
            (WorkflowStatus::Draft, AuditAction::Recall, patch)
        }
        WorkflowAction::MarkReviewed => {
            require_role(
                user,
                Role::Reviewer,
                "only reviewers can mark evaluations as reviewed",
            )?;
            expect_source(
                old_status,
                &[WorkflowStatus::PendingReview, WorkflowStatus::InReview],
                request.action,
            )?;
            let mut patch = RecordPatch {
                status: Some(WorkflowStatus::PendingApproval),
                reviewed_at: Some(Some(now)),
                ..Default::default()
            };
            if let Some(reviewer) = fill_if_absent(record.reviewer_id, request.reviewer_id, user.id)
            {
                patch.reviewer_id = Some(Some(reviewer));
            }
            if let Some(approver) = request.approver_id {
                patch.approver_id = Some(Some(approver));
            }
            (
                WorkflowStatus::PendingApproval,
                AuditAction::MarkReviewed,
                patch,
            )
        }
        WorkflowAction::Approve => {
            require_role(user, Role::Approver, "only approvers can approve evaluations")?;
            expect_source(old_status, &[WorkflowStatus::PendingApproval], request.action)?;
            let mut patch = RecordPatch {
                status: Some(WorkflowStatus::Approved),
                approved_at: Some(Some(now)),
                ..Default::default()
            };
            if let Some(approver) = fill_if_absent(record.approver_id, request.approver_id, user.id)
            {
                patch.approver_id = Some(Some(approver));
            }
            (WorkflowStatus::Approved, AuditAction::Approve, patch)
        }
        WorkflowAction::Reject => {
            require_role(user, Role::Approver, "only approvers can reject evaluations")?;
            expect_source(old_status, &[WorkflowStatus::PendingApproval], request.action)?;
            let reason = request
                .comment
                .as_deref()
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .ok_or_else(|| WorkflowError::validation("rejection reason is required"))?
                .to_string();
            comment = Some(reason.clone());
            let mut patch = RecordPatch {
                status: Some(WorkflowStatus::Rejected),
                rejected_at: Some(Some(now)),
                rejection_reason: Some(Some(reason)),
                ..Default::default()
            };
            if let Some(approver) = fill_if_absent(record.approver_id, request.approver_id, user.id)
            {
                patch.approver_id = Some(Some(approver));
            }
            (WorkflowStatus::Rejected, AuditAction::Reject, patch)
        }
        WorkflowAction::View | WorkflowAction::Edit | WorkflowAction::Delete => {
            return Err(WorkflowError::validation(format!(
                "'{}' is not a workflow transition",
                request.action
            )));
        }
    };

    // Defense in depth: the computed edge must also exist in the table.
    if !can_transition(old_status, new_status, user.role) {
        return Err(WorkflowError::forbidden_transition(
            old_status, new_status, user.role,
        ));
    }

    Ok(TransitionPlan {
        action: request.action,
        audit_action,
        old_status,
        new_status,
        patch,
        comment,
    })
}
