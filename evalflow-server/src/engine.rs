//! The workflow engine: orchestration of authorization, transition planning,
//! persistence, and audit logging.
//!
//! Every operation follows the same shape: resolve the record through the
//! access gateway, validate the request against the pure domain logic, apply
//! the change through the repository, then append an audit entry. Audit
//! writes are best effort and never fail the operation they describe.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use evalflow_core::audit::AuditAction;
use evalflow_core::error::WorkflowError;
use evalflow_core::record::{EvaluationPayload, EvaluationRecord, RecordId, RecordPatch, User, UserId};
use evalflow_core::roles::{
    available_actions, can_create, can_transition, can_view, is_admin, Role, WorkflowAction,
};
use evalflow_core::status::WorkflowStatus;
use evalflow_core::transition::{plan_transition, TransitionRequest};

use crate::access::{authorize, AccessKind};
use crate::audit::AuditLog;
use crate::repository::{
    NewAuditEntry, NewEvaluation, NewUser, RepositoryError, WorkflowRepository,
};

/// Result of a successful workflow transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    pub action: WorkflowAction,
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
    #[serde(skip)]
    pub record: EvaluationRecord,
}

/// Dashboard counters for the calling user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStats {
    pub total: usize,
    pub by_status: BTreeMap<&'static str, usize>,
    pub role_specific: serde_json::Value,
}

#[derive(Clone)]
pub struct WorkflowService {
    repository: Arc<dyn WorkflowRepository>,
    audit: AuditLog,
}

fn map_repo(e: RepositoryError) -> WorkflowError {
    match e {
        RepositoryError::NotFound => WorkflowError::NotFound,
        other => WorkflowError::persistence(other.to_string()),
    }
}

impl WorkflowService {
    pub fn new(repository: Arc<dyn WorkflowRepository>) -> Self {
        let audit = AuditLog::new(repository.clone());
        Self { repository, audit }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    // =========================================================================
    // Evaluations
    // =========================================================================

    pub async fn create_evaluation(
        &self,
        user: &User,
        payload: EvaluationPayload,
    ) -> Result<EvaluationRecord, WorkflowError> {
        if !can_create(user) {
            return Err(WorkflowError::forbidden(
                "only creators can create evaluations",
            ));
        }
        let now = Utc::now();
        let record = self
            .repository
            .create_record(
                NewEvaluation {
                    creator_id: user.id,
                    payload,
                },
                now.year(),
                now,
            )
            .await
            .map_err(map_repo)?;

        info!(record_id = %record.id, ite_number = %record.ite_number, "evaluation created");

        // CREATE carries no status pair so it never counts as a transition.
        self.audit
            .record(
                NewAuditEntry {
                    record_id: record.id,
                    user_id: user.id,
                    action: AuditAction::Create,
                    old_status: None,
                    new_status: None,
                    comment: None,
                    metadata: None,
                },
                now,
            )
            .await;

        Ok(record)
    }

    pub async fn get_evaluation(
        &self,
        user: &User,
        id: RecordId,
    ) -> Result<(EvaluationRecord, Vec<WorkflowAction>), WorkflowError> {
        let record = self.repository.get_record(id).await.map_err(map_repo)?;
        let record = authorize(user, record, AccessKind::View)?;
        let actions = available_actions(user, &record);
        Ok((record, actions))
    }

    /// All records visible to the caller, newest first.
    pub async fn list_evaluations(
        &self,
        user: &User,
    ) -> Result<Vec<EvaluationRecord>, WorkflowError> {
        let records = self.repository.list_records().await.map_err(map_repo)?;
        Ok(records
            .into_iter()
            .filter(|record| can_view(user, record))
            .collect())
    }

    /// Replace the payload of a record the caller may edit.
    ///
    /// A reviewer (or admin) editing a PENDING_REVIEW record implicitly moves
    /// it to IN_REVIEW and claims it if no reviewer is assigned yet.
    pub async fn update_evaluation(
        &self,
        user: &User,
        id: RecordId,
        payload: EvaluationPayload,
    ) -> Result<EvaluationRecord, WorkflowError> {
        let record = self.repository.get_record(id).await.map_err(map_repo)?;
        let record = authorize(user, record, AccessKind::Edit)?;
        let now = Utc::now();

        let mut patch = RecordPatch {
            payload: Some(payload),
            ..Default::default()
        };
        let starts_review = record.status == WorkflowStatus::PendingReview
            && can_transition(
                WorkflowStatus::PendingReview,
                WorkflowStatus::InReview,
                user.role,
            );
        if starts_review {
            patch.status = Some(WorkflowStatus::InReview);
            if record.reviewer_id.is_none() {
                patch.reviewer_id = Some(Some(user.id));
            }
        }

        let updated = self
            .repository
            .update_record(id, &patch, Some(record.status), now)
            .await
            .map_err(|e| match e {
                RepositoryError::StatusConflict { actual } => WorkflowError::Conflict {
                    expected: record.status,
                    actual,
                },
                other => map_repo(other),
            })?;

        let (old_status, new_status) = if starts_review {
            (
                Some(WorkflowStatus::PendingReview),
                Some(WorkflowStatus::InReview),
            )
        } else {
            (None, None)
        };
        self.audit
            .record(
                NewAuditEntry {
                    record_id: id,
                    user_id: user.id,
                    action: AuditAction::Update,
                    old_status,
                    new_status,
                    comment: None,
                    metadata: None,
                },
                now,
            )
            .await;

        Ok(updated)
    }

    pub async fn delete_evaluation(&self, user: &User, id: RecordId) -> Result<(), WorkflowError> {
        let record = self.repository.get_record(id).await.map_err(map_repo)?;
        let record = authorize(user, record, AccessKind::Delete)?;
        self.repository
            .delete_record(id)
            .await
            .map_err(map_repo)?;

        info!(record_id = %id, ite_number = %record.ite_number, "evaluation deleted");

        // The entry outlives the record it describes.
        self.audit
            .record(
                NewAuditEntry {
                    record_id: id,
                    user_id: user.id,
                    action: AuditAction::Delete,
                    old_status: None,
                    new_status: None,
                    comment: None,
                    metadata: None,
                },
                Utc::now(),
            )
            .await;
        Ok(())
    }

    pub async fn perform_transition(
        &self,
        user: &User,
        id: RecordId,
        request: &TransitionRequest,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let record = self.repository.get_record(id).await.map_err(map_repo)?;
        let record = authorize(user, record, AccessKind::View)?;
        let now = Utc::now();

        let plan = plan_transition(user, &record, request, now)?;

        // Conditional on the status the plan was computed against; a
        // concurrent transition turns into a Conflict instead of a silent
        // lost update.
        let updated = self
            .repository
            .update_record(id, &plan.patch, Some(plan.old_status), now)
            .await
            .map_err(|e| match e {
                RepositoryError::StatusConflict { actual } => WorkflowError::Conflict {
                    expected: plan.old_status,
                    actual,
                },
                other => map_repo(other),
            })?;

        info!(
            record_id = %id,
            action = %plan.action,
            from = %plan.old_status,
            to = %plan.new_status,
            "workflow transition"
        );

        self.audit
            .record(
                NewAuditEntry {
                    record_id: id,
                    user_id: user.id,
                    action: plan.audit_action,
                    old_status: Some(plan.old_status),
                    new_status: Some(plan.new_status),
                    comment: plan.comment.clone(),
                    metadata: Some(json!({
                        "reviewerId": updated.reviewer_id,
                        "approverId": updated.approver_id,
                    })),
                },
                now,
            )
            .await;

        Ok(TransitionOutcome {
            action: plan.action,
            from: plan.old_status,
            to: plan.new_status,
            record: updated,
        })
    }

    pub async fn stats(&self, user: &User) -> Result<WorkflowStats, WorkflowError> {
        let visible = self.list_evaluations(user).await?;

        let mut by_status: BTreeMap<&'static str, usize> = WorkflowStatus::ALL
            .iter()
            .map(|status| (status.as_str(), 0))
            .collect();
        for record in &visible {
            *by_status.entry(record.status.as_str()).or_insert(0) += 1;
        }

        let count = |pred: &dyn Fn(&EvaluationRecord) -> bool| {
            visible.iter().filter(|record| pred(record)).count()
        };
        let role_specific = match user.role {
            Role::Creator => json!({
                "drafts": count(&|r| r.status == WorkflowStatus::Draft),
                "rejected": count(&|r| r.status == WorkflowStatus::Rejected),
                "inProgress": count(&|r| r.status.is_review_state()
                    || r.status == WorkflowStatus::PendingApproval),
            }),
            Role::Reviewer => json!({
                "awaitingReview": count(&|r| r.status.is_review_state()),
                "assignedToMe": count(&|r| r.reviewer_id == Some(user.id)),
            }),
            Role::Approver => json!({
                "awaitingApproval": count(&|r| r.status == WorkflowStatus::PendingApproval),
                "assignedToMe": count(&|r| r.approver_id == Some(user.id)),
            }),
            Role::Admin => {
                let users = self.repository.list_users().await.map_err(map_repo)?;
                let mut by_role: BTreeMap<&'static str, usize> =
                    Role::ALL.iter().map(|role| (role.as_str(), 0)).collect();
                for user in &users {
                    *by_role.entry(user.role.as_str()).or_insert(0) += 1;
                }
                json!({ "usersByRole": by_role })
            }
            Role::Viewer => json!({}),
        };

        Ok(WorkflowStats {
            total: visible.len(),
            by_status,
            role_specific,
        })
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub async fn get_user(&self, id: UserId) -> Result<Option<User>, WorkflowError> {
        self.repository.get_user(id).await.map_err(map_repo)
    }

    /// Any authenticated user may list users (needed for assignment pickers).
    pub async fn list_users(&self, _user: &User) -> Result<Vec<User>, WorkflowError> {
        self.repository.list_users().await.map_err(map_repo)
    }

    pub async fn create_user(
        &self,
        actor: &User,
        new: NewUser,
    ) -> Result<User, WorkflowError> {
        if !is_admin(actor) {
            return Err(WorkflowError::forbidden("only admins can create users"));
        }
        if new.email.trim().is_empty() || !new.email.contains('@') {
            return Err(WorkflowError::validation("a valid email is required"));
        }
        if new.name.trim().is_empty() {
            return Err(WorkflowError::validation("a name is required"));
        }
        if self
            .repository
            .get_user_by_email(&new.email)
            .await
            .map_err(map_repo)?
            .is_some()
        {
            return Err(WorkflowError::validation(
                "a user with this email already exists",
            ));
        }
        let user = self.repository.create_user(new).await.map_err(map_repo)?;
        info!(user_id = %user.id, role = %user.role, "user created");
        Ok(user)
    }

    pub async fn set_user_role(
        &self,
        actor: &User,
        id: UserId,
        role: Role,
    ) -> Result<User, WorkflowError> {
        if !is_admin(actor) {
            return Err(WorkflowError::forbidden("only admins can change roles"));
        }
        // Keeps at least this admin able to administer.
        if actor.id == id && role != Role::Admin {
            return Err(WorkflowError::validation(
                "you cannot remove your own admin role",
            ));
        }
        let user = self
            .repository
            .set_user_role(id, role)
            .await
            .map_err(map_repo)?;
        info!(user_id = %user.id, role = %user.role, "user role changed");
        Ok(user)
    }
}
