//! Access gateway for record-level operations.
//!
//! Centralizes the rule that a record a caller may not view is reported as
//! not found, identical to a record that does not exist. Only once
//! visibility is established do edit and delete failures become Forbidden.

use evalflow_core::error::WorkflowError;
use evalflow_core::record::{EvaluationRecord, User};
use evalflow_core::roles::{can_delete, can_edit, can_view};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    View,
    Edit,
    Delete,
}

/// Authorize `user` to perform `kind` on a record looked up by id.
///
/// `record` is the lookup result; None means the id did not resolve.
/// Missing and unviewable records are indistinguishable to the caller.
pub fn authorize(
    user: &User,
    record: Option<EvaluationRecord>,
    kind: AccessKind,
) -> Result<EvaluationRecord, WorkflowError> {
    let record = record.ok_or(WorkflowError::NotFound)?;
    if !can_view(user, &record) {
        return Err(WorkflowError::NotFound);
    }
    match kind {
        AccessKind::View => Ok(record),
        AccessKind::Edit => {
            if can_edit(user, &record) {
                Ok(record)
            } else {
                Err(WorkflowError::forbidden(format!(
                    "you cannot edit an evaluation in status {}",
                    record.status
                )))
            }
        }
        AccessKind::Delete => {
            if can_delete(user, &record) {
                Ok(record)
            } else {
                Err(WorkflowError::forbidden(format!(
                    "you cannot delete an evaluation in status {}",
                    record.status
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use evalflow_core::record::{EvaluationPayload, RecordId, UserId};
    use evalflow_core::roles::Role;
    use evalflow_core::status::WorkflowStatus;

    fn user(id: i64, role: Role) -> User {
        User {
            id: UserId(id),
            email: format!("u{}@example.com", id),
            name: format!("U{}", id),
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
    fn test_missing_record_is_not_found() {
        let err = authorize(&user(1, Role::Admin), None, AccessKind::View).unwrap_err();
        assert_eq!(err, WorkflowError::NotFound);
    }

    #[test]
    fn test_unviewable_record_is_indistinguishable_from_missing() {
        // Another creator's draft is invisible to this creator.
        let caller = user(2, Role::Creator);
        let rec = record(1, WorkflowStatus::Draft);
        let err = authorize(&caller, Some(rec), AccessKind::View).unwrap_err();
        assert_eq!(err, WorkflowError::NotFound);
    }

    #[test]
    fn test_viewable_but_uneditable_record_is_forbidden() {
        // A viewer can see an approved record but never edit it.
        let caller = user(3, Role::Viewer);
        let rec = record(1, WorkflowStatus::Approved);
        assert!(authorize(&caller, Some(rec.clone()), AccessKind::View).is_ok());
        let err = authorize(&caller, Some(rec), AccessKind::Edit).unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden { .. }));
    }

    #[test]
    fn test_owner_edits_own_draft() {
        let caller = user(1, Role::Creator);
        let rec = record(1, WorkflowStatus::Draft);
        assert!(authorize(&caller, Some(rec), AccessKind::Edit).is_ok());
    }
}
