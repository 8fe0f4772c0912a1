//! The manager's HTTP API.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
};
use kinetic_common::{
    access_log,
    auth::{self, AuthSecret, AuthSubject},
    error::ApiError,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::{
    metrics,
    models::{
        CreateStrategyRequest, DeleteIntentsRequest, DeleteStrategyRequest, LoginRequest,
        LoginResponse,
    },
    service::StrategyService,
};

/// Single operator credential accepted by `auth/login`. User management
/// is an external concern; ownership inside the API keys off the token
/// subject.
#[derive(Clone)]
pub struct OperatorCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<StrategyService>,
    pub credentials: OperatorCredentials,
    pub secret: AuthSecret,
    pub token_ttl_secs: i64,
}

pub async fn run_server(
    cancel: CancellationToken,
    port: u16,
    state: AppState,
) -> Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/strategies", post(create_strategy).delete(delete_strategy))
        .route("/api/v1/strategies/self", get(list_strategies))
        .route("/api/v1/intents", delete(delete_intents))
        .route("/api/v1/intents/self", get(list_intents))
        .route("/api/v1/nodes", get(nodes))
        .route("/api/v1/nodes/{node_id}/pods/pids", get(node_pod_pids))
        .route("/health", get(health))
        .layer(axum::middleware::from_fn(access_log::manager))
        .layer(Extension(state.secret.clone()))
        .layer(cors)
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(%addr, "starting manager HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .context("manager server failed")?;

    tracing::info!("manager server stopped gracefully");
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(ApiError::Validation(
            "username and password are required".to_string(),
        ));
    }
    if req.username != state.credentials.username || req.password != state.credentials.password {
        return Err(ApiError::Auth("invalid username or password".to_string()));
    }
    let (token, _) = auth::issue_token(&state.secret.0, &req.username, state.token_ttl_secs)
        .map_err(ApiError::Internal)?;
    metrics::login_succeeded();
    Ok(Json(LoginResponse { token }))
}

async fn create_strategy(
    State(state): State<AppState>,
    AuthSubject(caller): AuthSubject,
    Json(req): Json<CreateStrategyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.service.create_strategy(&caller, req).await?;
    Ok(Json(created))
}

async fn list_strategies(
    State(state): State<AppState>,
    AuthSubject(caller): AuthSubject,
) -> Result<impl IntoResponse, ApiError> {
    let strategies = state.service.list_strategies(&caller).await?;
    Ok(Json(serde_json::json!({ "strategies": strategies })))
}

async fn delete_strategy(
    State(state): State<AppState>,
    AuthSubject(caller): AuthSubject,
    Json(req): Json<DeleteStrategyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.delete_strategy(&caller, req.strategy_id).await?;
    Ok(Json(serde_json::json!({ "deleted": req.strategy_id })))
}

async fn list_intents(
    State(state): State<AppState>,
    AuthSubject(caller): AuthSubject,
) -> Result<impl IntoResponse, ApiError> {
    let intents = state.service.list_intents(&caller).await?;
    Ok(Json(serde_json::json!({ "intents": intents })))
}

async fn delete_intents(
    State(state): State<AppState>,
    AuthSubject(caller): AuthSubject,
    Json(req): Json<DeleteIntentsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.delete_intents(&caller, req.intent_ids).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn nodes(
    State(state): State<AppState>,
    AuthSubject(_caller): AuthSubject,
) -> Result<impl IntoResponse, ApiError> {
    let nodes = state.service.nodes().await?;
    Ok(Json(serde_json::json!({ "nodes": nodes })))
}

async fn node_pod_pids(
    State(state): State<AppState>,
    AuthSubject(_caller): AuthSubject,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let mapping = state.service.node_pod_pids(&node_id).await?;
    Ok(Json(mapping))
}
