//! Repository abstraction for workflow persistence.
//!
//! This module defines the `WorkflowRepository` trait that abstracts
//! storage operations for users, evaluation records, and audit entries.
//! Implementations can provide different backends (in-memory, SQLite, etc.).

mod memory;
mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use evalflow_core::audit::{AuditAction, AuditLogEntry};
use evalflow_core::record::{EvaluationPayload, EvaluationRecord, RecordId, RecordPatch, User, UserId};
use evalflow_core::roles::Role;
use evalflow_core::status::WorkflowStatus;

/// Errors surfaced by repository implementations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// The underlying store failed during `operation`.
    Storage {
        operation: &'static str,
        reason: String,
    },
    /// Persisted data could not be decoded.
    Corruption { what: String },
    /// The requested row does not exist.
    NotFound,
    /// A conditional update found the record in a different status than the
    /// caller observed. Carries the status actually in the store.
    StatusConflict { actual: WorkflowStatus },
}

impl RepositoryError {
    pub fn storage(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            reason: reason.into(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        Self::Corruption { what: what.into() }
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage { operation, reason } => {
                write!(f, "storage error during {}: {}", operation, reason)
            }
            Self::Corruption { what } => write!(f, "corrupted {}", what),
            Self::NotFound => write!(f, "row not found"),
            Self::StatusConflict { actual } => {
                write!(f, "record status is {} in the store", actual)
            }
        }
    }
}

impl std::error::Error for RepositoryError {}

/// Input for creating an evaluation record. The repository assigns the id,
/// the per-year running number, and the timestamps.
#[derive(Debug, Clone)]
pub struct NewEvaluation {
    pub creator_id: UserId,
    pub payload: EvaluationPayload,
}

/// Input for creating a user account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub role: Role,
}

/// Input for appending an audit entry. The repository assigns the id and
/// `created_at`.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub record_id: RecordId,
    pub user_id: UserId,
    pub action: AuditAction,
    pub old_status: Option<WorkflowStatus>,
    pub new_status: Option<WorkflowStatus>,
    pub comment: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Repository trait for persisting workflow state.
///
/// Implementations of this trait provide the actual storage backend. The
/// engine uses this trait to abstract away storage details, so tests can run
/// against the in-memory backend and production against SQLite.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Create a record in DRAFT with the next running number for the given
    /// year. The number sequence must not repeat within a year even under
    /// concurrent creation.
    async fn create_record(
        &self,
        new: NewEvaluation,
        year: i32,
        now: DateTime<Utc>,
    ) -> Result<EvaluationRecord, RepositoryError>;

    /// Get a record by id, returning None if not found.
    async fn get_record(&self, id: RecordId) -> Result<Option<EvaluationRecord>, RepositoryError>;

    /// All records, newest first.
    async fn list_records(&self) -> Result<Vec<EvaluationRecord>, RepositoryError>;

    /// Apply a patch to a record, conditional on its status.
    ///
    /// When `expected_status` is Some, the update only proceeds if the
    /// stored status still matches; otherwise `StatusConflict` is returned
    /// with the status actually found. This is the lost-update guard for
    /// workflow transitions.
    async fn update_record(
        &self,
        id: RecordId,
        patch: &RecordPatch,
        expected_status: Option<WorkflowStatus>,
        now: DateTime<Utc>,
    ) -> Result<EvaluationRecord, RepositoryError>;

    /// Delete a record. Audit entries referencing it are retained.
    async fn delete_record(&self, id: RecordId) -> Result<(), RepositoryError>;

    async fn create_user(&self, new: NewUser) -> Result<User, RepositoryError>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    async fn list_users(&self) -> Result<Vec<User>, RepositoryError>;

    async fn set_user_role(&self, id: UserId, role: Role) -> Result<User, RepositoryError>;

    /// Append an audit entry. Entries are never updated or deleted.
    async fn insert_audit_entry(
        &self,
        new: NewAuditEntry,
        now: DateTime<Utc>,
    ) -> Result<AuditLogEntry, RepositoryError>;

    /// Audit entries for a record, newest first, with actor identities
    /// resolved where the user still exists.
    async fn list_audit_entries(
        &self,
        record_id: RecordId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError>;

    /// Full audit history for a record, oldest first. Used for summaries.
    async fn list_audit_entries_asc(
        &self,
        record_id: RecordId,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError>;
}
