//! Administrative gate in front of every listing and mutating route.
//!
//! The store itself never authenticates; this layer is the precondition the
//! transport enforces before a request reaches it.

use crate::error::AppError;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

pub async fn require_admin_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token_from_header(request.headers())?;

    let expected = state.admin_token.as_bytes();
    if !bool::from(token.as_bytes().ct_eq(expected)) {
        tracing::warn!(
            path = %request.uri().path(),
            "rejected request with invalid admin token"
        );
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}

fn extract_token_from_header(headers: &HeaderMap) -> Result<&str, AppError> {
    let auth_header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::Authentication("Missing Authorization header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Authentication("Invalid Authorization header format".to_string()))?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        AppError::Authentication("Authorization header must start with 'Bearer '".to_string())
    })?;

    if token.is_empty() {
        return Err(AppError::Authentication("Empty token".to_string()));
    }

    Ok(token)
}
