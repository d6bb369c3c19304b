//! Pure domain logic for the evaluation workflow.
//!
//! This crate has no I/O. It defines the role and status vocabulary, the
//! permission predicates, the workflow transition table, the pure transition
//! planner, and the audit entry/summary types. The server crate layers
//! persistence and HTTP on top of these.

pub mod audit;
pub mod error;
pub mod record;
pub mod roles;
pub mod status;
pub mod transition;

pub use audit::{AuditAction, AuditActor, AuditLogEntry, AuditSummary};
pub use error::WorkflowError;
pub use record::{EvaluationPayload, EvaluationRecord, RecordId, RecordPatch, User, UserId};
pub use roles::{
    available_actions, can_create, can_delete, can_edit, can_perform, can_transition, can_view,
    has_role, is_admin, Role, TransitionRule, WorkflowAction, TRANSITION_TABLE,
};
pub use status::WorkflowStatus;
pub use transition::{plan_transition, TransitionPlan, TransitionRequest};
