use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Every way an intake operation can fail.
///
/// Operations never partially apply: a failed ingest leaves no new file in
/// the managed directory and a failed removal leaves the file in place.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("managed directory {path} is unavailable: {reason}")]
    StorageUnavailable { path: PathBuf, reason: String },

    #[error("invalid file name {name:?} (expected a .{extension} file)")]
    InvalidName { name: String, extension: String },

    #[error("content detected as {detected:?}, required {required}")]
    InvalidContentType {
        detected: Option<String>,
        required: String,
        extension: String,
    },

    #[error("file too large: {size} bytes (max: {max_size} bytes)")]
    FileTooLarge { size: u64, max_size: u64 },

    #[error("no free name derived from {name:?} after {attempts} attempts")]
    StorageExhausted { name: String, attempts: u32 },

    #[error("path {name:?} resolves outside the managed directory")]
    PathEscape { name: String },

    #[error("file {name:?} not found")]
    NotFound { name: String },

    #[error("failed to write {name:?}: {source}")]
    WriteFailed {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to delete {name:?}: {source}")]
    DeleteFailed {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    /// Short status line shown to the person who triggered the operation.
    pub fn user_message(&self) -> String {
        match self {
            StoreError::StorageUnavailable { path, .. } => format!(
                "The {} folder is missing or not writable. Ask your host to create it with write permissions.",
                path.display()
            ),
            StoreError::InvalidName { extension, .. } => {
                format!("Invalid file. Only `.{}` files are allowed.", extension)
            }
            StoreError::InvalidContentType { extension, .. } => {
                format!("Only {} files are allowed.", extension.to_uppercase())
            }
            StoreError::FileTooLarge { max_size, .. } => {
                format!("File too large (max {}).", super::models::format_size(*max_size))
            }
            StoreError::StorageExhausted { .. } => {
                "Upload failed (too many files with this name).".to_string()
            }
            StoreError::PathEscape { .. } => "Invalid path.".to_string(),
            StoreError::NotFound { .. } => "File not found.".to_string(),
            StoreError::WriteFailed { .. } => "Upload failed (permissions?).".to_string(),
            StoreError::DeleteFailed { .. } => "Delete failed (permissions?).".to_string(),
        }
    }

    pub fn is_security_violation(&self) -> bool {
        matches!(self, StoreError::PathEscape { .. })
    }
}
