//! REST API server for the investment advisor
//!
//! Session-scoped chat over HTTP. Every response is wrapped in `ApiResponse`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::Advisor;
use crate::error::AdvisorError;
use crate::router::QueryRouter;
use crate::state::{SessionStore, SessionView};

const DEFAULT_SEARCH_RESULTS: usize = 5;
const MAX_SEARCH_RESULTS: usize = 20;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct DocumentsRequest {
    pub banking_text: String,
    pub trading_text: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn ok<T: Serialize>(data: T) -> ApiResult {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn fail(e: AdvisorError) -> ApiResult {
    let status = match &e {
        AdvisorError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        AdvisorError::InvalidInput(_) | AdvisorError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
        AdvisorError::ProfileIncomplete(_) | AdvisorError::ExtractionFailed(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AdvisorError::Llm(_) | AdvisorError::Embedding(_) | AdvisorError::HttpError(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        warn!(%status, "Request failed: {}", e);
    }
    (status, Json(ApiResponse::error(e.to_string())))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub advisor: Arc<Advisor>,
    pub router: Arc<QueryRouter>,
    pub sessions: Arc<dyn SessionStore>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let sessions = state.sessions.count().await;
    let index = state.advisor.index().stats().await;

    Json(serde_json::json!({
        "status": "healthy",
        "sessions": sessions,
        "index": index,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Session Endpoints
/// =============================

async fn create_session(State(state): State<ApiState>) -> ApiResult {
    let (session_id, handle) = match state.sessions.create().await {
        Ok(created) => created,
        Err(e) => return fail(e),
    };

    let mut session = handle.lock().await;
    let greeting = QueryRouter::greeting();
    session.transcript.advisor(greeting, Some("greeting".to_string()));
    info!(%session_id, "Session created");

    ok(serde_json::json!({
        "session_id": session_id,
        "stage": session.state.stage(),
        "message": greeting,
    }))
}

async fn get_session(State(state): State<ApiState>, Path(session_id): Path<Uuid>) -> ApiResult {
    match state.sessions.get(session_id).await {
        Ok(handle) => {
            let view: SessionView = handle.lock().await.view();
            ok(view)
        }
        Err(e) => fail(e),
    }
}

async fn upload_documents(
    State(state): State<ApiState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<DocumentsRequest>,
) -> ApiResult {
    let handle = match state.sessions.get(session_id).await {
        Ok(handle) => handle,
        Err(e) => return fail(e),
    };

    info!(%session_id, "Received financial documents");

    let profile = match state
        .advisor
        .build_profile(&req.banking_text, &req.trading_text)
        .await
    {
        Ok(profile) => profile,
        Err(e) => return fail(e),
    };

    let mut session = handle.lock().await;
    let reply = state.router.confirm_documents(&mut session.state, profile);
    session
        .transcript
        .advisor(&reply.message, Some("documents".to_string()));

    ok(serde_json::json!({
        "reply": reply,
        "profile": session.state.profile(),
    }))
}

async fn chat(
    State(state): State<ApiState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<ChatRequest>,
) -> ApiResult {
    if req.message.trim().is_empty() {
        return fail(AdvisorError::InvalidInput("message is empty".to_string()));
    }

    let handle = match state.sessions.get(session_id).await {
        Ok(handle) => handle,
        Err(e) => return fail(e),
    };

    let mut session = handle.lock().await;
    session.transcript.user(&req.message);

    let reply = state.router.handle(&mut session.state, &req.message).await;
    session
        .transcript
        .advisor(&reply.message, reply.intent.map(|i| i.to_string()));

    info!(
        %session_id,
        stage = %reply.stage,
        intent = ?reply.intent,
        "Chat turn complete"
    );

    ok(reply)
}

/// =============================
/// Knowledge Endpoints
/// =============================

async fn news_status(State(state): State<ApiState>) -> ApiResult {
    let status = state.advisor.enrichment_status().await;
    let message = status.message();
    let index = state.advisor.index().stats().await;

    ok(serde_json::json!({
        "status": status,
        "message": message,
        "index": index,
    }))
}

async fn search(State(state): State<ApiState>, Json(req): Json<SearchRequest>) -> ApiResult {
    let top_k = req
        .top_k
        .unwrap_or(DEFAULT_SEARCH_RESULTS)
        .clamp(1, MAX_SEARCH_RESULTS);

    match state.advisor.search(&req.query, top_k).await {
        Ok(hits) => ok(serde_json::json!({
            "query": req.query,
            "hits": hits,
        })),
        Err(e) => fail(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(advisor: Arc<Advisor>, sessions: Arc<dyn SessionStore>) -> Router {
    let router = Arc::new(QueryRouter::new(Arc::clone(&advisor)));
    let state = ApiState {
        advisor,
        router,
        sessions,
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/documents", post(upload_documents))
        .route("/api/sessions/:id/chat", post(chat))
        .route("/api/news/status", get(news_status))
        .route("/api/search", post(search))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    advisor: Arc<Advisor>,
    sessions: Arc<dyn SessionStore>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(advisor, sessions);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
