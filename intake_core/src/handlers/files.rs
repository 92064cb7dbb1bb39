use axum::{
    extract::{Form, Multipart, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::{
    error::{AppError, Result},
    models::{ApiResponse, DeleteForm, FileListResponse, StoredFileResponse},
    AppState,
};

/// Multipart field carrying the uploaded document.
pub const UPLOAD_FIELD: &str = "file";

const NO_FILE_RECEIVED: &str = "No file received.";

const UPLOAD_PIPE_LEN: usize = 64 * 1024;

pub fn create_file_routes() -> Router<AppState> {
    Router::new()
        .route("/downloads", get(list_files).post(upload_file))
        .route("/downloads/delete", post(delete_file_form))
        .route("/downloads/:name", delete(delete_file))
}

pub async fn list_files(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<FileListResponse>>> {
    let files = state.store.list_all().await?;
    Ok(Json(ApiResponse::success(files.into_iter().collect())))
}

pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<StoredFileResponse>>)> {
    while let Some(mut field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(format!("Failed to read multipart field: {}", e))
    })? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let raw_name = field.file_name().unwrap_or_default().to_string();
        if raw_name.is_empty() {
            return Err(AppError::BadRequest(NO_FILE_RECEIVED.to_string()));
        }

        // The field is piped into the store chunk by chunk, so the size limit
        // is enforced while the body arrives rather than after buffering it.
        let (reader, mut writer) = tokio::io::duplex(UPLOAD_PIPE_LEN);
        let pump = async move {
            while let Some(chunk) = field.chunk().await.map_err(|e| {
                AppError::BadRequest(format!("Failed to read file data: {}", e))
            })? {
                writer.write_all(&chunk).await?;
            }
            Ok::<_, AppError>(())
        };
        let store = &state.store;
        let claimed = raw_name.as_str();
        let ingest = async move { store.ingest(claimed, reader).await.map_err(AppError::from) };

        let ((), stored) = tokio::try_join!(pump, ingest)?;
        info!(claimed = %raw_name, name = %stored.name, "upload accepted");

        let response = ApiResponse::success(StoredFileResponse::from(stored))
            .with_message("Upload successful.");
        return Ok((StatusCode::CREATED, Json(response)));
    }

    Err(AppError::BadRequest(NO_FILE_RECEIVED.to_string()))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<()>>> {
    state.store.remove(&name).await?;
    Ok(Json(ApiResponse::message_only("File deleted.")))
}

/// Form variant of [`delete_file`] for plain HTML form posts.
pub async fn delete_file_form(
    State(state): State<AppState>,
    Form(form): Form<DeleteForm>,
) -> Result<Json<ApiResponse<()>>> {
    state.store.remove(&form.file).await?;
    Ok(Json(ApiResponse::message_only("File deleted.")))
}
