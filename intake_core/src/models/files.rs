//! Wire representations of stored files

use serde::Serialize;

use crate::files::StoredFile;

#[derive(Debug, Serialize)]
pub struct StoredFileResponse {
    pub name: String,
    pub size_bytes: u64,
    pub size: String,
    pub url: String,
    pub modified_at: Option<String>,
}

impl From<StoredFile> for StoredFileResponse {
    fn from(file: StoredFile) -> Self {
        Self {
            size: file.display_size(),
            modified_at: file.modified_at.map(|t| t.to_rfc3339()),
            name: file.name,
            size_bytes: file.size_bytes,
            url: file.public_url,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub files: Vec<StoredFileResponse>,
    pub total: usize,
    pub total_bytes: u64,
}

impl FromIterator<StoredFile> for FileListResponse {
    fn from_iter<I: IntoIterator<Item = StoredFile>>(iter: I) -> Self {
        let files: Vec<StoredFileResponse> = iter.into_iter().map(Into::into).collect();
        Self {
            total: files.len(),
            total_bytes: files.iter().map(|f| f.size_bytes).sum(),
            files,
        }
    }
}
