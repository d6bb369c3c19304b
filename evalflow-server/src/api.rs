//! HTTP surface.
//!
//! Caller identity comes from the `x-user-id` header, resolved against the
//! user table; an upstream gateway is expected to authenticate and set it.
//! All error responses share one JSON shape with a stable machine-readable
//! code.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use evalflow_core::error::WorkflowError;
use evalflow_core::record::{EvaluationPayload, RecordId, User, UserId};
use evalflow_core::roles::{Role, WorkflowAction};
use evalflow_core::transition::TransitionRequest;

use crate::audit::DEFAULT_AUDIT_PAGE_SIZE;
use crate::repository::NewUser;
use crate::AppState;

pub struct ApiError(WorkflowError);

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            WorkflowError::Unauthorized => StatusCode::UNAUTHORIZED,
            WorkflowError::Forbidden { .. } => StatusCode::FORBIDDEN,
            WorkflowError::NotFound => StatusCode::NOT_FOUND,
            WorkflowError::Validation { .. } => StatusCode::BAD_REQUEST,
            WorkflowError::Conflict { .. } => StatusCode::CONFLICT,
            WorkflowError::Persistence { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Storage details stay in the logs, not in responses.
        let message = match &self.0 {
            WorkflowError::Persistence { reason } => {
                error!("persistence failure: {}", reason);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = Json(json!({
            "error": message,
            "code": self.0.kind(),
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Extract and parse the `x-user-id` header.
fn user_id_from_headers(headers: &HeaderMap) -> Option<UserId> {
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i64>().ok())
        .map(UserId)
}

async fn current_user(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let id = user_id_from_headers(headers).ok_or(WorkflowError::Unauthorized)?;
    state
        .service
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError(WorkflowError::Unauthorized))
}

// =============================================================================
// Evaluations
// =============================================================================

async fn create_evaluation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<EvaluationPayload>,
) -> ApiResult<Response> {
    let user = current_user(&state, &headers).await?;
    let record = state.service.create_evaluation(&user, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "evaluation": record })),
    )
        .into_response())
}

async fn list_evaluations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let user = current_user(&state, &headers).await?;
    let records = state.service.list_evaluations(&user).await?;
    Ok(Json(json!({ "success": true, "evaluations": records })).into_response())
}

async fn get_evaluation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let user = current_user(&state, &headers).await?;
    let (record, actions) = state.service.get_evaluation(&user, RecordId(id)).await?;
    Ok(Json(json!({
        "success": true,
        "evaluation": record,
        "availableActions": actions,
    }))
    .into_response())
}

async fn update_evaluation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<EvaluationPayload>,
) -> ApiResult<Response> {
    let user = current_user(&state, &headers).await?;
    let record = state
        .service
        .update_evaluation(&user, RecordId(id), payload)
        .await?;
    Ok(Json(json!({ "success": true, "evaluation": record })).into_response())
}

async fn delete_evaluation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let user = current_user(&state, &headers).await?;
    state.service.delete_evaluation(&user, RecordId(id)).await?;
    Ok(Json(json!({ "success": true })).into_response())
}

/// Transition body with the action still as a raw token, so a missing or
/// unknown action surfaces as a ValidationError in the standard error shape
/// rather than a serde rejection.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransitionRequest {
    action: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    reviewer_id: Option<UserId>,
    #[serde(default)]
    approver_id: Option<UserId>,
}

fn parse_transition_request(raw: RawTransitionRequest) -> Result<TransitionRequest, WorkflowError> {
    let token = raw
        .action
        .ok_or_else(|| WorkflowError::validation("action is required"))?;
    let action = WorkflowAction::parse(&token)
        .ok_or_else(|| WorkflowError::validation(format!("unknown action '{}'", token)))?;
    Ok(TransitionRequest {
        action,
        comment: raw.comment,
        reviewer_id: raw.reviewer_id,
        approver_id: raw.approver_id,
    })
}

async fn workflow_transition(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(raw): Json<RawTransitionRequest>,
) -> ApiResult<Response> {
    let user = current_user(&state, &headers).await?;
    let request = parse_transition_request(raw)?;
    let outcome = state
        .service
        .perform_transition(&user, RecordId(id), &request)
        .await?;
    Ok(Json(json!({
        "success": true,
        "evaluation": outcome.record,
        "transition": {
            "action": outcome.action,
            "from": outcome.from,
            "to": outcome.to,
        },
    }))
    .into_response())
}

async fn evaluation_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let user = current_user(&state, &headers).await?;
    let stats = state.service.stats(&user).await?;
    Ok(Json(json!({ "success": true, "stats": stats })).into_response())
}

// =============================================================================
// Audit logs
// =============================================================================

#[derive(Debug, Deserialize)]
struct AuditQuery {
    limit: Option<usize>,
    offset: Option<usize>,
    #[serde(default)]
    summary: bool,
}

async fn audit_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Response> {
    let user = current_user(&state, &headers).await?;
    // Visibility of the history follows visibility of the record.
    let (record, _) = state.service.get_evaluation(&user, RecordId(id)).await?;

    if query.summary {
        let summary = state.service.audit().summarize(record.id).await?;
        return Ok(Json(json!({ "success": true, "summary": summary })).into_response());
    }

    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);
    let logs = state.service.audit().list(record.id, limit, offset).await?;
    Ok(Json(json!({
        "success": true,
        "logs": logs,
        "pagination": {
            "limit": limit,
            "offset": offset,
            "count": logs.len(),
        },
    }))
    .into_response())
}

// =============================================================================
// Users
// =============================================================================

#[derive(Debug, Deserialize)]
struct CreateUserRequest {
    email: String,
    name: String,
    role: Role,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRoleRequest {
    user_id: i64,
    role: Role,
}

async fn list_users(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let user = current_user(&state, &headers).await?;
    let users = state.service.list_users(&user).await?;
    Ok(Json(json!({ "success": true, "users": users })).into_response())
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateUserRequest>,
) -> ApiResult<Response> {
    let actor = current_user(&state, &headers).await?;
    let user = state
        .service
        .create_user(
            &actor,
            NewUser {
                email: request.email,
                name: request.name,
                role: request.role,
            },
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "user": user })),
    )
        .into_response())
}

async fn update_user_role(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<UpdateRoleRequest>,
) -> ApiResult<Response> {
    let actor = current_user(&state, &headers).await?;
    let user = state
        .service
        .set_user_role(&actor, UserId(request.user_id), request.role)
        .await?;
    Ok(Json(json!({ "success": true, "user": user })).into_response())
}

pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/evaluations", post(create_evaluation).get(list_evaluations))
        .route("/api/evaluations/stats", get(evaluation_stats))
        .route(
            "/api/evaluations/:id",
            get(get_evaluation)
                .put(update_evaluation)
                .delete(delete_evaluation),
        )
        .route("/api/evaluations/:id/workflow", post(workflow_transition))
        .route("/api/evaluations/:id/audit-logs", get(audit_logs))
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/role", put(update_user_role))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_user_id_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(user_id_from_headers(&headers), None);

        headers.insert("x-user-id", HeaderValue::from_static("42"));
        assert_eq!(user_id_from_headers(&headers), Some(UserId(42)));

        headers.insert("x-user-id", HeaderValue::from_static(" 7 "));
        assert_eq!(user_id_from_headers(&headers), Some(UserId(7)));

        headers.insert("x-user-id", HeaderValue::from_static("not-a-number"));
        assert_eq!(user_id_from_headers(&headers), None);
    }

    #[test]
    fn test_transition_request_action_token_parsing() {
        let raw = |action: Option<&str>| RawTransitionRequest {
            action: action.map(String::from),
            comment: None,
            reviewer_id: None,
            approver_id: None,
        };

        let request = parse_transition_request(raw(Some("mark_reviewed"))).unwrap();
        assert_eq!(request.action, WorkflowAction::MarkReviewed);

        let err = parse_transition_request(raw(None)).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation { .. }));

        let err = parse_transition_request(raw(Some("escalate"))).unwrap_err();
        match err {
            WorkflowError::Validation { reason } => {
                assert!(reason.contains("escalate"), "got: {}", reason)
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (WorkflowError::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                WorkflowError::forbidden("nope"),
                StatusCode::FORBIDDEN,
            ),
            (WorkflowError::NotFound, StatusCode::NOT_FOUND),
            (
                WorkflowError::validation("bad"),
                StatusCode::BAD_REQUEST,
            ),
            (
                WorkflowError::persistence("disk on fire"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let response = ApiError(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
