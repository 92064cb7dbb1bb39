use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One file inside the managed directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub name: String,
    pub size_bytes: u64,
    pub public_url: String,
    pub modified_at: Option<DateTime<Utc>>,
}

impl StoredFile {
    pub fn display_size(&self) -> String {
        format_size(self.size_bytes)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageStatus {
    pub directory: PathBuf,
    pub writable: bool,
    pub file_count: u64,
    pub total_bytes: u64,
}

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Human-readable size using base-1024 units, e.g. `512 B` or `1.5 MB`.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.1} {}", value, SIZE_UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(1536 * 1024), "1.5 MB");
        assert_eq!(format_size(25 * 1024 * 1024), "25.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_display_size_uses_size_bytes() {
        let file = StoredFile {
            name: "report.pdf".to_string(),
            size_bytes: 4096,
            public_url: "https://example.com/downloads/report.pdf".to_string(),
            modified_at: None,
        };
        assert_eq!(file.display_size(), "4.0 KB");
    }
}
