pub mod files;
pub mod request;

pub use files::{FileListResponse, StoredFileResponse};
pub use request::{ApiResponse, DeleteForm};
