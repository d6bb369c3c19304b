//! In-memory implementation of `WorkflowRepository`.
//!
//! All state is held in memory and lost on restart. Used by the engine
//! tests and available as a backend for ephemeral deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use evalflow_core::audit::{AuditActor, AuditLogEntry};
use evalflow_core::record::{
    format_ite_number, EvaluationRecord, RecordId, RecordPatch, User, UserId,
};
use evalflow_core::roles::Role;
use evalflow_core::status::WorkflowStatus;

use super::{NewAuditEntry, NewEvaluation, NewUser, RepositoryError, WorkflowRepository};

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, User>,
    records: HashMap<RecordId, EvaluationRecord>,
    audit: Vec<AuditLogEntry>,
    /// Highest running number handed out per year.
    running_numbers: HashMap<i32, i64>,
    next_user_id: i64,
    next_record_id: i64,
    next_audit_id: i64,
}

/// In-memory workflow repository.
///
/// Everything lives in one `Inner` under a single `RwLock`, which makes
/// the running-number allocation and conditional updates trivially atomic.
pub struct InMemoryRepository {
    inner: RwLock<Inner>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_actor(users: &HashMap<UserId, User>, user_id: UserId) -> Option<AuditActor> {
    users.get(&user_id).map(|user| AuditActor {
        id: user.id,
        email: user.email.clone(),
        name: user.name.clone(),
        role: user.role,
    })
}

#[async_trait]
impl WorkflowRepository for InMemoryRepository {
    async fn create_record(
        &self,
        new: NewEvaluation,
        year: i32,
        now: DateTime<Utc>,
    ) -> Result<EvaluationRecord, RepositoryError> {
        let mut inner = self.inner.write().await;
        inner.next_record_id += 1;
        let id = RecordId(inner.next_record_id);
        let running_number = {
            let counter = inner.running_numbers.entry(year).or_insert(0);
            *counter += 1;
            *counter
        };
        let record = EvaluationRecord {
            id,
            ite_number: format_ite_number(year, running_number),
            year,
            running_number,
            status: WorkflowStatus::Draft,
            creator_id: new.creator_id,
            reviewer_id: None,
            approver_id: None,
            submitted_at: None,
            reviewed_at: None,
            approved_at: None,
            rejected_at: None,
            rejection_reason: None,
            payload: new.payload,
            created_at: now,
            updated_at: now,
        };
        inner.records.insert(id, record.clone());
        Ok(record)
    }

    async fn get_record(&self, id: RecordId) -> Result<Option<EvaluationRecord>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.records.get(&id).cloned())
    }

    async fn list_records(&self) -> Result<Vec<EvaluationRecord>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut records: Vec<_> = inner.records.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.0.cmp(&a.id.0)));
        Ok(records)
    }

    async fn update_record(
        &self,
        id: RecordId,
        patch: &RecordPatch,
        expected_status: Option<WorkflowStatus>,
        now: DateTime<Utc>,
    ) -> Result<EvaluationRecord, RepositoryError> {
        let mut inner = self.inner.write().await;
        let record = inner.records.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if let Some(expected) = expected_status {
            if record.status != expected {
                return Err(RepositoryError::StatusConflict {
                    actual: record.status,
                });
            }
        }
        patch.apply(record, now);
        Ok(record.clone())
    }

    async fn delete_record(&self, id: RecordId) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        inner
            .records
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    async fn create_user(&self, new: NewUser) -> Result<User, RepositoryError> {
        let mut inner = self.inner.write().await;
        if inner.users.values().any(|user| user.email == new.email) {
            return Err(RepositoryError::storage(
                "create user",
                format!("email {} already exists", new.email),
            ));
        }
        inner.next_user_id += 1;
        let user = User {
            id: UserId(inner.next_user_id),
            email: new.email,
            name: new.name,
            role: new.role,
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().find(|user| user.email == email).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut users: Vec<_> = inner.users.values().cloned().collect();
        users.sort_by_key(|user| user.id.0);
        Ok(users)
    }

    async fn set_user_role(&self, id: UserId, role: Role) -> Result<User, RepositoryError> {
        let mut inner = self.inner.write().await;
        let user = inner.users.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        user.role = role;
        Ok(user.clone())
    }

    async fn insert_audit_entry(
        &self,
        new: NewAuditEntry,
        now: DateTime<Utc>,
    ) -> Result<AuditLogEntry, RepositoryError> {
        let mut inner = self.inner.write().await;
        inner.next_audit_id += 1;
        let entry = AuditLogEntry {
            id: inner.next_audit_id,
            record_id: new.record_id,
            user_id: new.user_id,
            action: new.action,
            old_status: new.old_status,
            new_status: new.new_status,
            comment: new.comment,
            metadata: new.metadata,
            created_at: now,
            actor: resolve_actor(&inner.users, new.user_id),
        };
        inner.audit.push(entry.clone());
        Ok(entry)
    }

    async fn list_audit_entries(
        &self,
        record_id: RecordId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .audit
            .iter()
            .rev()
            .filter(|entry| entry.record_id == record_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_audit_entries_asc(
        &self,
        record_id: RecordId,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .audit
            .iter()
            .filter(|entry| entry.record_id == record_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalflow_core::audit::AuditAction;
    use evalflow_core::record::EvaluationPayload;

    fn new_eval(creator: i64) -> NewEvaluation {
        NewEvaluation {
            creator_id: UserId(creator),
            payload: EvaluationPayload::default(),
        }
    }

    #[tokio::test]
    async fn test_running_numbers_are_sequential_per_year() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        let a = repo.create_record(new_eval(1), 2026, now).await.unwrap();
        let b = repo.create_record(new_eval(1), 2026, now).await.unwrap();
        let c = repo.create_record(new_eval(1), 2027, now).await.unwrap();
        assert_eq!(a.ite_number, "ITE-2026-001");
        assert_eq!(b.ite_number, "ITE-2026-002");
        assert_eq!(c.ite_number, "ITE-2027-001");
    }

    #[tokio::test]
    async fn test_conditional_update_detects_status_conflict() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        let record = repo.create_record(new_eval(1), 2026, now).await.unwrap();

        let patch = RecordPatch {
            status: Some(WorkflowStatus::PendingReview),
            ..Default::default()
        };
        repo.update_record(record.id, &patch, Some(WorkflowStatus::Draft), now)
            .await
            .unwrap();

        // Same precondition again: the record is no longer in DRAFT.
        let err = repo
            .update_record(record.id, &patch, Some(WorkflowStatus::Draft), now)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RepositoryError::StatusConflict {
                actual: WorkflowStatus::PendingReview
            }
        );
    }

    #[tokio::test]
    async fn test_audit_entries_survive_record_deletion() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        let record = repo.create_record(new_eval(1), 2026, now).await.unwrap();
        repo.insert_audit_entry(
            NewAuditEntry {
                record_id: record.id,
                user_id: UserId(1),
                action: AuditAction::Create,
                old_status: None,
                new_status: None,
                comment: None,
                metadata: None,
            },
            now,
        )
        .await
        .unwrap();

        repo.delete_record(record.id).await.unwrap();
        assert_eq!(repo.get_record(record.id).await.unwrap(), None);
        let entries = repo.list_audit_entries(record.id, 50, 0).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_set_user_role_updates_and_round_trips() {
        let repo = InMemoryRepository::new();
        let user = repo
            .create_user(NewUser {
                email: "v@example.com".into(),
                name: "V".into(),
                role: Role::Viewer,
            })
            .await
            .unwrap();

        let updated = repo.set_user_role(user.id, Role::Approver).await.unwrap();
        assert_eq!(updated.role, Role::Approver);
        let fetched = repo.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(fetched.role, Role::Approver);

        let err = repo
            .set_user_role(UserId(999), Role::Admin)
            .await
            .unwrap_err();
        assert_eq!(err, RepositoryError::NotFound);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_rejected() {
        let repo = InMemoryRepository::new();
        let user = NewUser {
            email: "a@example.com".into(),
            name: "A".into(),
            role: Role::Creator,
        };
        repo.create_user(user.clone()).await.unwrap();
        assert!(repo.create_user(user).await.is_err());
    }

    #[tokio::test]
    async fn test_audit_pagination_is_newest_first() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        let record = repo.create_record(new_eval(1), 2026, now).await.unwrap();
        for _ in 0..5 {
            repo.insert_audit_entry(
                NewAuditEntry {
                    record_id: record.id,
                    user_id: UserId(1),
                    action: AuditAction::Update,
                    old_status: None,
                    new_status: None,
                    comment: None,
                    metadata: None,
                },
                now,
            )
            .await
            .unwrap();
        }
        let page = repo.list_audit_entries(record.id, 2, 1).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, 4);
        assert_eq!(page[1].id, 3);
    }
}
