//! HTTP service for the evaluation workflow.
//!
//! Layers persistence (`repository`), orchestration (`engine`), and the
//! HTTP surface (`api`) over the pure domain logic in `evalflow-core`.

pub mod access;
pub mod api;
pub mod audit;
pub mod config;
pub mod engine;
pub mod repository;

use engine::WorkflowService;

/// Shared application state for the HTTP handlers.
pub struct AppState {
    pub service: WorkflowService,
}
