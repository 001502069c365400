//! HTTP surface: health, login, and search
//!
//! Thin axum layer over the service registry. Authentication happens before
//! any retrieval work; an invalid or expired bearer token is rejected with
//! 401 and no partial results.

use crate::error::SibylError;
use crate::generate::Citation;
use crate::services::ServiceRegistry;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: String,
    pub email: String,
    pub department: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub department_filter: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub latency_ms: u64,
    pub chunks_found: usize,
}

/// API error mapped to a status code and a `detail` body
enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Unauthorized(detail) => (StatusCode::UNAUTHORIZED, detail),
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            ApiError::Internal(detail) => (StatusCode::INTERNAL_SERVER_ERROR, detail),
        };

        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

impl From<SibylError> for ApiError {
    fn from(error: SibylError) -> Self {
        match error {
            SibylError::Unauthorized(msg) => ApiError::Unauthorized(msg),
            SibylError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            other => {
                tracing::error!("Request failed: {}", other);
                ApiError::Internal("Internal server error".to_string())
            }
        }
    }
}

/// Build the application router
pub fn router(registry: Arc<ServiceRegistry>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/login", post(login))
        .route("/api/search", post(search))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(registry)
}

/// Bind and serve until shutdown
pub async fn serve(registry: Arc<ServiceRegistry>) -> crate::error::Result<()> {
    let bind_addr = registry.config.server.bind_addr.clone();
    let app = router(registry);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| SibylError::Io {
            source: e,
            context: format!("Failed to bind {}", bind_addr),
        })?;

    tracing::info!("Listening on {}", bind_addr);

    axum::serve(listener, app).await.map_err(|e| SibylError::Io {
        source: e,
        context: "Server error".to_string(),
    })
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "service": "sibyl" }))
}

async fn login(
    State(registry): State<Arc<ServiceRegistry>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = registry
        .database
        .get_user_by_email(&request.email)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::Unauthorized(format!("Unknown user: {}", request.email)))?;

    let token = registry
        .authenticator
        .create_token(&user.user_id)
        .map_err(ApiError::from)?;

    Ok(Json(LoginResponse {
        token,
        user_id: user.user_id,
        email: user.email,
        department: user.department,
        roles: user.roles,
    }))
}

async fn search(
    State(registry): State<Arc<ServiceRegistry>>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

    let user = registry
        .authenticator
        .authenticate(token, &registry.database)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::Unauthorized("Invalid or expired token".to_string()))?;

    let outcome = registry
        .execute_search(&user, &request.query, request.department_filter.as_deref())
        .await
        .map_err(ApiError::from)?;

    Ok(Json(SearchResponse {
        answer: outcome.answer,
        citations: outcome.citations,
        latency_ms: outcome.latency_ms,
        chunks_found: outcome.chunks_found,
    }))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}
