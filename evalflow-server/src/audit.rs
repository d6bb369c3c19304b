//! Audit log service on top of the repository.
//!
//! Writes are best effort: a failed audit insert is logged and swallowed so
//! the workflow operation it describes still succeeds. Reads surface
//! persistence failures to the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::error;

use evalflow_core::audit::{AuditLogEntry, AuditSummary};
use evalflow_core::error::WorkflowError;
use evalflow_core::record::RecordId;

use crate::repository::{NewAuditEntry, WorkflowRepository};

/// Default page size for audit listings.
pub const DEFAULT_AUDIT_PAGE_SIZE: usize = 50;

/// Upper bound on a single audit page.
pub const MAX_AUDIT_PAGE_SIZE: usize = 500;

#[derive(Clone)]
pub struct AuditLog {
    repository: Arc<dyn WorkflowRepository>,
}

impl AuditLog {
    pub fn new(repository: Arc<dyn WorkflowRepository>) -> Self {
        Self { repository }
    }

    /// Append an entry, best effort. Returns None if the write failed.
    pub async fn record(&self, new: NewAuditEntry, now: DateTime<Utc>) -> Option<AuditLogEntry> {
        match self.repository.insert_audit_entry(new.clone(), now).await {
            Ok(entry) => Some(entry),
            Err(e) => {
                error!(
                    record_id = %new.record_id,
                    action = %new.action,
                    "failed to write audit entry: {}",
                    e
                );
                None
            }
        }
    }

    /// Entries for a record, newest first. The limit is clamped to
    /// [`MAX_AUDIT_PAGE_SIZE`].
    pub async fn list(
        &self,
        record_id: RecordId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditLogEntry>, WorkflowError> {
        let limit = limit.min(MAX_AUDIT_PAGE_SIZE);
        self.repository
            .list_audit_entries(record_id, limit, offset)
            .await
            .map_err(|e| WorkflowError::persistence(e.to_string()))
    }

    /// Derived summary over the record's full history.
    pub async fn summarize(&self, record_id: RecordId) -> Result<AuditSummary, WorkflowError> {
        let entries = self
            .repository
            .list_audit_entries_asc(record_id)
            .await
            .map_err(|e| WorkflowError::persistence(e.to_string()))?;
        Ok(AuditSummary::from_entries(&entries))
    }
}
