use anyhow::Result;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use evalflow_core::roles::Role;
use evalflow_server::api::api_router;
use evalflow_server::config::Config;
use evalflow_server::engine::WorkflowService;
use evalflow_server::repository::{NewUser, SqliteRepository, WorkflowRepository};
use evalflow_server::AppState;

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "evalflow"
    })))
}

/// Create the bootstrap admin account on first start, when the user table is
/// empty and an email is configured. Without it no request can authenticate.
async fn bootstrap_admin(repository: &dyn WorkflowRepository, config: &Config) -> Result<()> {
    let Some(email) = &config.bootstrap_admin_email else {
        return Ok(());
    };
    if !repository.list_users().await?.is_empty() {
        return Ok(());
    }
    let admin = repository
        .create_user(NewUser {
            email: email.clone(),
            name: config.bootstrap_admin_name.clone(),
            role: Role::Admin,
        })
        .await?;
    info!(user_id = %admin.id, email = %admin.email, "bootstrap admin account created");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting evaluation workflow service");

    let config = Config::from_env()?;

    let db_path = config.state_dir.join("evalflow.db");
    info!("Using state database: {}", db_path.display());
    let repository = Arc::new(SqliteRepository::new(&db_path)?);

    bootstrap_admin(repository.as_ref(), &config).await?;

    let app_state = Arc::new(AppState {
        service: WorkflowService::new(repository),
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(api_router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
