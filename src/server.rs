//! HTTP boundary over the citation engine.
//!
//! Exposes the engine's three operations as a JSON API for the agent
//! runtime (tool-result normalization) and the presentation layer (history
//! fetch, conversation reset).
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/conversations/{user_id}/{course_id}/history` | Resolved, newest-first history (`?limit=N`) |
//! | `POST` | `/conversations/{user_id}/{course_id}/clear` | Reset a conversation |
//! | `POST` | `/conversations/{user_id}/{course_id}/tool-result` | Normalize one raw tool result |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "unknown tool: foo" } }
//! ```
//!
//! Error codes: `bad_request` (400), `internal` (500). History fetches do
//! not error: every storage failure degrades to the closest renderable
//! state inside the engine.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! course clients.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::engine::CitationEngine;
use crate::models::{ConversationKey, UserMessage};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    engine: Arc<CitationEngine>,
}

/// Starts the HTTP server.
///
/// Binds to the address configured in `[server].bind` and serves until the
/// process is terminated. This is the entry point used by `cite serve api`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = CitationEngine::connect(config).await?;
    run_server_with_engine(config, Arc::new(engine)).await
}

/// Starts the HTTP server over a caller-supplied engine.
///
/// Useful for embedding the API next to an existing pool or a custom
/// ephemeral tier.
pub async fn run_server_with_engine(
    config: &Config,
    engine: Arc<CitationEngine>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState { engine };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route(
            "/conversations/{user_id}/{course_id}/history",
            get(handle_history),
        )
        .route(
            "/conversations/{user_id}/{course_id}/clear",
            post(handle_clear),
        )
        .route(
            "/conversations/{user_id}/{course_id}/tool-result",
            post(handle_tool_result),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("Citation API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /conversations/{user_id}/{course_id}/history ============

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HistoryResponse {
    user_id: String,
    course_id: String,
    messages: Vec<UserMessage>,
}

async fn handle_history(
    State(state): State<AppState>,
    Path((user_id, course_id)): Path<(String, String)>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    if params.limit == Some(0) {
        return Err(bad_request("limit must be >= 1"));
    }

    let key = ConversationKey::new(user_id.clone(), course_id.clone());
    let messages = state.engine.get_history(&key, params.limit).await;

    Ok(Json(HistoryResponse {
        user_id,
        course_id,
        messages,
    }))
}

// ============ POST /conversations/{user_id}/{course_id}/clear ============

#[derive(Serialize)]
struct ClearResponse {
    cleared: bool,
}

async fn handle_clear(
    State(state): State<AppState>,
    Path((user_id, course_id)): Path<(String, String)>,
) -> Result<Json<ClearResponse>, AppError> {
    let key = ConversationKey::new(user_id, course_id);
    state
        .engine
        .clear_conversation(&key)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(ClearResponse { cleared: true }))
}

// ============ POST /conversations/{user_id}/{course_id}/tool-result ============

#[derive(Deserialize)]
struct ToolResultRequest {
    /// Recorded tool name; selects the retrieval category.
    tool: String,
    /// Tool invocation id, used to disambiguate previous-page image
    /// references.
    #[serde(default)]
    invocation_id: Option<String>,
    /// The raw `{success, results}` envelope returned by the tool.
    result: serde_json::Value,
}

async fn handle_tool_result(
    State(state): State<AppState>,
    Path((user_id, course_id)): Path<(String, String)>,
    Json(request): Json<ToolResultRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let category = state
        .engine
        .category_for_tool(&request.tool)
        .ok_or_else(|| bad_request(format!("unknown tool: {}", request.tool)))?;

    let key = ConversationKey::new(user_id, course_id);
    let normalized = state
        .engine
        .on_tool_result(
            &key,
            category,
            request.result,
            request.invocation_id.as_deref(),
        )
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(serde_json::json!({ "result": normalized })))
}
