//! Audit log entry and summary types.
//!
//! Entries are append-only: once written they are never updated or deleted.
//! The summary is derived purely from an ascending slice of entries so it can
//! be unit-tested without a store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::record::{RecordId, UserId};
use crate::roles::Role;
use crate::status::WorkflowStatus;

/// What happened. Wire-visible vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Submit,
    Recall,
    MarkReviewed,
    Approve,
    Reject,
}

impl AuditAction {
    pub const ALL: [AuditAction; 8] = [
        AuditAction::Create,
        AuditAction::Update,
        AuditAction::Delete,
        AuditAction::Submit,
        AuditAction::Recall,
        AuditAction::MarkReviewed,
        AuditAction::Approve,
        AuditAction::Reject,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Submit => "SUBMIT",
            Self::Recall => "RECALL",
            Self::MarkReviewed => "MARK_REVIEWED",
            Self::Approve => "APPROVE",
            Self::Reject => "REJECT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|action| action.as_str() == s)
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Actor identity resolved for display alongside an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditActor {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub role: Role,
}

/// One append-only audit event.
///
/// `old_status`/`new_status` are null when the action did not change status
/// (e.g. a payload UPDATE). `created_at` is server-assigned and, together
/// with the insertion-ordered id, gives a stable per-record ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: i64,
    pub record_id: RecordId,
    pub user_id: UserId,
    pub action: AuditAction,
    pub old_status: Option<WorkflowStatus>,
    pub new_status: Option<WorkflowStatus>,
    pub comment: Option<String>,
    /// Opaque side-channel, e.g. assignee ids at the time of the action.
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    /// Resolved actor, absent if the user row no longer exists.
    pub actor: Option<AuditActor>,
}

/// Derived view of a record's audit history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    pub total_actions: usize,
    /// Timestamp of the earliest entry (record creation).
    pub created_at: Option<DateTime<Utc>>,
    /// First occurrence of each workflow milestone.
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    /// Actor of the most recent entry.
    pub last_modified_by: Option<AuditActor>,
    /// Count of entries that actually changed status, as opposed to
    /// non-transitioning edits.
    pub transitions: usize,
}

impl AuditSummary {
    /// Derive a summary from entries ordered oldest first.
    pub fn from_entries(entries: &[AuditLogEntry]) -> Self {
        let first_of = |action: AuditAction| {
            entries
                .iter()
                .find(|entry| entry.action == action)
                .map(|entry| entry.created_at)
        };
        Self {
            total_actions: entries.len(),
            created_at: entries.first().map(|entry| entry.created_at),
            submitted_at: first_of(AuditAction::Submit),
            reviewed_at: first_of(AuditAction::MarkReviewed),
            approved_at: first_of(AuditAction::Approve),
            rejected_at: first_of(AuditAction::Reject),
            last_modified_by: entries.last().and_then(|entry| entry.actor.clone()),
            transitions: entries
                .iter()
                .filter(|entry| entry.new_status.is_some())
                .count(),
        }
    }
}
