//! The evaluation record and its supporting types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::roles::Role;
use crate::status::WorkflowStatus;

/// Newtype for user identifiers to prevent mixing with record ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Newtype for evaluation record identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A user identity with exactly one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub role: Role,
}

/// The payload carried by an evaluation record.
///
/// These fields are opaque to the workflow engine: editors mutate them but
/// they carry no transition semantics. They are persisted as a single JSON
/// blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluationPayload {
    pub metadata: serde_json::Value,
    pub its_fields: serde_json::Value,
    pub comparison_data: serde_json::Value,
    pub recommendations: serde_json::Value,
    pub accepted_cells: serde_json::Value,
    pub comments: String,
}

/// One evaluation travelling through the approval pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRecord {
    pub id: RecordId,
    /// Human-facing number, e.g. `ITE-2026-004`. Unique per record.
    pub ite_number: String,
    pub year: i32,
    pub running_number: i64,
    pub status: WorkflowStatus,
    pub creator_id: UserId,
    pub reviewer_id: Option<UserId>,
    pub approver_id: Option<UserId>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    /// Non-empty exactly when `status` is REJECTED.
    pub rejection_reason: Option<String>,
    pub payload: EvaluationPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Format the human-facing record number for a given year and running number.
pub fn format_ite_number(year: i32, running_number: i64) -> String {
    format!("ITE-{}-{:03}", year, running_number)
}

/// A partial update to an evaluation record.
///
/// Nullable fields are tri-state: `None` leaves the field unchanged,
/// `Some(None)` clears it, `Some(Some(v))` sets it. This makes "clear
/// rejection metadata on resubmit" an explicit part of the patch rather
/// than a side effect buried in the persistence layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub status: Option<WorkflowStatus>,
    pub reviewer_id: Option<Option<UserId>>,
    pub approver_id: Option<Option<UserId>>,
    pub submitted_at: Option<Option<DateTime<Utc>>>,
    pub reviewed_at: Option<Option<DateTime<Utc>>>,
    pub approved_at: Option<Option<DateTime<Utc>>>,
    pub rejected_at: Option<Option<DateTime<Utc>>>,
    pub rejection_reason: Option<Option<String>>,
    pub payload: Option<EvaluationPayload>,
}

impl RecordPatch {
    /// Apply this patch to a record in place, stamping `updated_at`.
    pub fn apply(&self, record: &mut EvaluationRecord, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(reviewer_id) = self.reviewer_id {
            record.reviewer_id = reviewer_id;
        }
        if let Some(approver_id) = self.approver_id {
            record.approver_id = approver_id;
        }
        if let Some(submitted_at) = self.submitted_at {
            record.submitted_at = submitted_at;
        }
        if let Some(reviewed_at) = self.reviewed_at {
            record.reviewed_at = reviewed_at;
        }
        if let Some(approved_at) = self.approved_at {
            record.approved_at = approved_at;
        }
        if let Some(rejected_at) = self.rejected_at {
            record.rejected_at = rejected_at;
        }
        if let Some(ref rejection_reason) = self.rejection_reason {
            record.rejection_reason = rejection_reason.clone();
        }
        if let Some(ref payload) = self.payload {
            record.payload = payload.clone();
        }
        record.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft_record() -> EvaluationRecord {
        let now = Utc::now();
        EvaluationRecord {
            id: RecordId(1),
            ite_number: format_ite_number(2026, 1),
            year: 2026,
            running_number: 1,
            status: WorkflowStatus::Draft,
            creator_id: UserId(10),
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
    fn test_format_ite_number_pads_running_number() {
        assert_eq!(format_ite_number(2026, 7), "ITE-2026-007");
        assert_eq!(format_ite_number(2026, 123), "ITE-2026-123");
        assert_eq!(format_ite_number(2026, 1234), "ITE-2026-1234");
    }

    #[test]
    fn test_patch_tri_state_semantics() {
        let mut record = draft_record();
        record.rejection_reason = Some("missing brand field".into());
        record.rejected_at = Some(Utc::now());

        let now = Utc::now();
        let patch = RecordPatch {
            status: Some(WorkflowStatus::PendingReview),
            submitted_at: Some(Some(now)),
            rejected_at: Some(None),
            rejection_reason: Some(None),
            ..Default::default()
        };
        patch.apply(&mut record, now);

        assert_eq!(record.status, WorkflowStatus::PendingReview);
        assert_eq!(record.submitted_at, Some(now));
        assert_eq!(record.rejected_at, None);
        assert_eq!(record.rejection_reason, None);
        // Untouched fields stay as they were.
        assert_eq!(record.reviewer_id, None);
        assert_eq!(record.updated_at, now);
    }

    #[test]
    fn test_empty_patch_only_touches_updated_at() {
        let mut record = draft_record();
        let before = record.clone();
        let now = Utc::now();
        RecordPatch::default().apply(&mut record, now);
        assert_eq!(record.status, before.status);
        assert_eq!(record.payload, before.payload);
        assert_eq!(record.updated_at, now);
    }
}
