//! Application error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::files::StoreError;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized | AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Store(err) => match err {
                StoreError::InvalidName { .. } | StoreError::InvalidContentType { .. } => {
                    StatusCode::BAD_REQUEST
                }
                StoreError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                StoreError::PathEscape { .. } => StatusCode::FORBIDDEN,
                StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                StoreError::StorageUnavailable { .. } | StoreError::StorageExhausted { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                StoreError::WriteFailed { .. } | StoreError::DeleteFailed { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            AppError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = match self {
            AppError::BadRequest(msg) => msg,
            AppError::Unauthorized => "Unauthorized".to_string(),
            AppError::Authentication(msg) => msg,
            AppError::Store(err) => {
                if err.is_security_violation() {
                    tracing::warn!("Rejected store request: {}", err);
                } else if status.is_server_error() {
                    tracing::error!("Store error: {:?}", err);
                } else {
                    tracing::debug!("Store request failed: {}", err);
                }
                err.user_message()
            }
            AppError::IoError(err) => {
                tracing::error!("IO error: {:?}", err);
                "Internal server error".to_string()
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
