//! Public, unauthenticated routes

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};

use crate::{models::ApiResponse, AppState};

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
}

async fn handle_root(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(serde_json::json!({
        "app": state.app_name,
        "version": state.version,
        "endpoints": {
            "health": "/health",
            "downloads": "/api/downloads",
            "delete": "/api/downloads/{name}",
            "delete_form": "/api/downloads/delete"
        }
    })))
}

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let storage = state.store.status().await;
    let status = if storage.writable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = ApiResponse::success(serde_json::json!({
        "status": if storage.writable { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().timestamp(),
        "storage": {
            "writable": storage.writable,
            "file_count": storage.file_count,
            "total_bytes": storage.total_bytes,
        }
    }));

    (status, Json(body))
}
