//! Error taxonomy for workflow operations.
//!
//! Every public operation recovers into one of these variants at its
//! boundary; nothing panics across the API. `Conflict` is the only variant
//! where retrying is the documented correct response.

use std::fmt;

use crate::roles::Role;
use crate::status::WorkflowStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// No resolvable caller identity.
    Unauthorized,
    /// Caller resolved but lacks permission for the requested operation.
    Forbidden { reason: String },
    /// Record id does not resolve, or the record is hidden from the caller.
    NotFound,
    /// Malformed input: bad action, empty rejection comment, illegal source
    /// status for the requested action.
    Validation { reason: String },
    /// The record's status changed between read and write (lost-update
    /// race). Callers should reload and retry.
    Conflict {
        expected: WorkflowStatus,
        actual: WorkflowStatus,
    },
    /// Underlying store unavailable. Fatal to the request, not retried.
    Persistence { reason: String },
}

impl WorkflowError {
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn persistence(reason: impl Into<String>) -> Self {
        Self::Persistence {
            reason: reason.into(),
        }
    }

    /// Transition rejected by the table. The message names the attempted
    /// edge and the caller's role so the failure is self-explanatory.
    pub fn forbidden_transition(from: WorkflowStatus, to: WorkflowStatus, role: Role) -> Self {
        Self::Forbidden {
            reason: format!("cannot transition from {} to {} with role {}", from, to, role),
        }
    }

    /// Stable machine-readable kind for API payloads and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Conflict { .. } => "CONFLICT",
            Self::Persistence { .. } => "PERSISTENCE_FAILURE",
        }
    }
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Forbidden { reason } => write!(f, "{}", reason),
            Self::NotFound => write!(f, "evaluation not found"),
            Self::Validation { reason } => write!(f, "{}", reason),
            Self::Conflict { expected, actual } => write!(
                f,
                "evaluation status changed from {} to {} while the request was in flight; reload and retry",
                expected, actual
            ),
            Self::Persistence { reason } => write!(f, "storage failure: {}", reason),
        }
    }
}

impl std::error::Error for WorkflowError {}
