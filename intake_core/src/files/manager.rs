use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream, TryStreamExt};
use tempfile::{NamedTempFile, PersistError};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::error::StoreError;
use super::models::{StorageStatus, StoredFile};
use super::sanitize::NameSanitizer;
use super::validation::{ContentValidator, SNIFF_LEN};
use crate::config::StorageConfig;

const COPY_BUFFER_LEN: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub directory: PathBuf,
    pub base_url: String,
    pub extension: String,
    pub content_type: String,
    pub max_file_size: u64,
    pub max_name_attempts: u32,
    pub file_mode: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("downloads"),
            base_url: "http://127.0.0.1:3000/downloads".to_string(),
            extension: "pdf".to_string(),
            content_type: mime::APPLICATION_PDF.essence_str().to_string(),
            max_file_size: 25 * 1024 * 1024,
            max_name_attempts: 10_000,
            file_mode: 0o644,
        }
    }
}

impl From<&StorageConfig> for StoreConfig {
    fn from(settings: &StorageConfig) -> Self {
        Self {
            directory: settings.directory.clone(),
            base_url: settings.base_url.clone(),
            extension: settings.extension.clone(),
            content_type: settings.content_type.clone(),
            max_file_size: settings.max_file_size_mb * 1024 * 1024,
            max_name_attempts: settings.max_name_attempts,
            file_mode: settings.file_mode,
        }
    }
}

/// Owns the managed directory. Uploads go through [`StoreEngine::ingest`],
/// deletions through [`StoreEngine::remove`].
///
/// There is no in-process locking. Concurrent callers are kept apart by the
/// filesystem: uploads are staged under a temporary name and moved into
/// place with a no-clobber rename, so the loser of a naming race simply
/// probes the next candidate.
#[derive(Debug, Clone)]
pub struct StoreEngine {
    config: StoreConfig,
    sanitizer: NameSanitizer,
    validator: ContentValidator,
}

enum ListState {
    Pending,
    Reading(fs::ReadDir),
    Done,
}

impl StoreEngine {
    pub fn new(mut config: StoreConfig) -> Result<Self, StoreError> {
        if config.directory.is_relative() {
            let cwd = std::env::current_dir().map_err(|e| StoreError::StorageUnavailable {
                path: config.directory.clone(),
                reason: format!("cannot resolve working directory: {}", e),
            })?;
            config.directory = cwd.join(&config.directory);
        }

        let sanitizer = NameSanitizer::new(&config.extension);
        let validator = ContentValidator::new(&config.content_type, &config.extension);

        Ok(Self {
            config,
            sanitizer,
            validator,
        })
    }

    pub async fn initialize(&self) -> Result<(), StoreError> {
        self.ensure_directory().await?;
        info!(
            directory = %self.config.directory.display(),
            extension = %self.sanitizer.extension(),
            content_type = %self.validator.required_type(),
            "managed directory ready"
        );
        Ok(())
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    pub fn max_file_size(&self) -> u64 {
        self.config.max_file_size
    }

    pub fn public_url(&self, name: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), name)
    }

    /// Stores `content` under a sanitized, collision-free version of
    /// `raw_name`. Uploading the same name twice yields two files.
    pub async fn ingest<R>(&self, raw_name: &str, mut content: R) -> Result<StoredFile, StoreError>
    where
        R: AsyncRead + Unpin,
    {
        self.ensure_directory().await?;

        let name = self.sanitizer.sanitize(raw_name)?;

        let head = read_head(&mut content, SNIFF_LEN)
            .await
            .map_err(|source| StoreError::WriteFailed {
                name: name.clone(),
                source,
            })?;

        if let Err(err) = self.validator.validate(&head) {
            warn!(name = %name, error = %err, "rejected upload content");
            return Err(err);
        }

        let (staged, size_bytes) = self.stage(&name, &head, &mut content).await?;
        let stored_name = self.commit(staged, &name).await?;

        let path = self.config.directory.join(&stored_name);
        let modified_at = fs::metadata(&path).await.ok().and_then(|m| modified_time(&m));

        info!(name = %stored_name, size_bytes, "stored upload");

        Ok(StoredFile {
            public_url: self.public_url(&stored_name),
            name: stored_name,
            size_bytes,
            modified_at,
        })
    }

    /// Deletes one managed file. The claimed name is checked lexically and
    /// then again on canonical paths before anything is touched.
    pub async fn remove(&self, claimed_name: &str) -> Result<(), StoreError> {
        self.ensure_directory().await?;

        if claimed_name.trim().is_empty()
            || claimed_name.contains('\0')
            || !self.sanitizer.has_required_extension(claimed_name)
        {
            return Err(self.sanitizer.invalid(claimed_name));
        }

        if claimed_name.contains(['/', '\\'])
            || claimed_name.contains("..")
            || Path::new(claimed_name).is_absolute()
        {
            return Err(self.escape(claimed_name));
        }

        let path = self.config.directory.join(claimed_name);

        // Inspected without following links; a symlink is never a managed file.
        let entry = match fs::symlink_metadata(&path).await {
            Ok(entry) => entry,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    name: claimed_name.to_string(),
                })
            }
            Err(source) => {
                return Err(StoreError::DeleteFailed {
                    name: claimed_name.to_string(),
                    source,
                })
            }
        };
        if entry.file_type().is_symlink() {
            return Err(self.escape(claimed_name));
        }
        if !entry.is_file() {
            return Err(StoreError::NotFound {
                name: claimed_name.to_string(),
            });
        }

        let root = fs::canonicalize(&self.config.directory)
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;
        let target = fs::canonicalize(&path)
            .await
            .map_err(|source| StoreError::DeleteFailed {
                name: claimed_name.to_string(),
                source,
            })?;

        // Only direct children that are themselves managed files qualify.
        let managed_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| self.sanitizer.has_required_extension(n))
            .unwrap_or(false);
        if target.parent() != Some(root.as_path()) || !managed_name {
            return Err(self.escape(claimed_name));
        }

        fs::remove_file(&path)
            .await
            .map_err(|source| StoreError::DeleteFailed {
                name: claimed_name.to_string(),
                source,
            })?;

        info!(name = %claimed_name, "deleted file");
        Ok(())
    }

    /// Lazily enumerates managed files. Each call starts a fresh directory
    /// scan; entries come in whatever order the filesystem yields them.
    pub fn list(&self) -> impl Stream<Item = Result<StoredFile, StoreError>> + Send + 'static {
        stream::unfold((self.clone(), ListState::Pending), |(engine, state)| async move {
            let mut entries = match state {
                ListState::Done => return None,
                ListState::Reading(entries) => entries,
                ListState::Pending => match fs::read_dir(&engine.config.directory).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        let err = engine.unavailable(e.to_string());
                        return Some((Err(err), (engine, ListState::Done)));
                    }
                },
            };

            loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        if let Some(file) = engine.describe_entry(&entry).await {
                            return Some((Ok(file), (engine, ListState::Reading(entries))));
                        }
                    }
                    Ok(None) => return None,
                    Err(e) => {
                        let err = engine.unavailable(e.to_string());
                        return Some((Err(err), (engine, ListState::Done)));
                    }
                }
            }
        })
    }

    pub async fn list_all(&self) -> Result<Vec<StoredFile>, StoreError> {
        self.list().try_collect().await
    }

    pub async fn status(&self) -> StorageStatus {
        let writable = self.ensure_directory().await.is_ok();
        let (file_count, total_bytes) = match self.list_all().await {
            Ok(files) => (
                files.len() as u64,
                files.iter().map(|f| f.size_bytes).sum(),
            ),
            Err(_) => (0, 0),
        };

        StorageStatus {
            directory: self.config.directory.clone(),
            writable,
            file_count,
            total_bytes,
        }
    }

    async fn ensure_directory(&self) -> Result<(), StoreError> {
        let dir = &self.config.directory;

        match fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(self.unavailable("path exists but is not a directory".to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(dir)
                    .await
                    .map_err(|e| self.unavailable(format!("cannot create directory: {}", e)))?;
                info!(directory = %dir.display(), "created managed directory");
            }
            Err(e) => return Err(self.unavailable(e.to_string())),
        }

        let meta = fs::metadata(dir)
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;
        if !meta.is_dir() {
            return Err(self.unavailable("path exists but is not a directory".to_string()));
        }

        // Mode bits alone do not say whether this process may write here.
        let probe_dir = dir.clone();
        run_blocking(move || {
            tempfile::Builder::new()
                .prefix(".intake-probe-")
                .tempfile_in(&probe_dir)
                .map(drop)
        })
        .await
        .map_err(|e| self.unavailable(format!("directory is not writable: {}", e)))?;

        Ok(())
    }

    /// Writes the upload to a hidden temporary file inside the managed
    /// directory, enforcing the size limit along the way.
    async fn stage<R>(
        &self,
        name: &str,
        head: &[u8],
        content: &mut R,
    ) -> Result<(NamedTempFile, u64), StoreError>
    where
        R: AsyncRead + Unpin,
    {
        let write_failed = |source: io::Error| StoreError::WriteFailed {
            name: name.to_string(),
            source,
        };
        let max_size = self.config.max_file_size;

        let dir = self.config.directory.clone();
        let (staged, file) = run_blocking(move || {
            let staged = tempfile::Builder::new()
                .prefix(".intake-")
                .suffix(".part")
                .tempfile_in(&dir)?;
            let file = staged.as_file().try_clone()?;
            Ok((staged, file))
        })
        .await
        .map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => {
                self.unavailable(format!("directory is not writable: {}", e))
            }
            _ => write_failed(e),
        })?;

        let mut size_bytes = head.len() as u64;
        if size_bytes > max_size {
            return Err(StoreError::FileTooLarge {
                size: size_bytes,
                max_size,
            });
        }

        let mut out = fs::File::from_std(file);
        out.write_all(head).await.map_err(write_failed)?;

        let mut buf = vec![0u8; COPY_BUFFER_LEN];
        loop {
            let n = content.read(&mut buf).await.map_err(write_failed)?;
            if n == 0 {
                break;
            }
            size_bytes += n as u64;
            if size_bytes > max_size {
                return Err(StoreError::FileTooLarge {
                    size: size_bytes,
                    max_size,
                });
            }
            out.write_all(&buf[..n]).await.map_err(write_failed)?;
        }

        out.flush().await.map_err(write_failed)?;
        out.sync_all().await.map_err(write_failed)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            out.set_permissions(std::fs::Permissions::from_mode(self.config.file_mode))
                .await
                .map_err(write_failed)?;
        }
        drop(out);

        Ok((staged, size_bytes))
    }

    /// Moves the staged file to the first free candidate name:
    /// `name`, then `base-1.ext`, `base-2.ext`, ... up to the attempt cap.
    async fn commit(&self, staged: NamedTempFile, name: &str) -> Result<String, StoreError> {
        let (base, extension) = self
            .sanitizer
            .split_extension(name)
            .ok_or_else(|| self.sanitizer.invalid(name))?;

        let mut staged = staged;
        for attempt in 0..=self.config.max_name_attempts {
            let candidate = if attempt == 0 {
                name.to_string()
            } else {
                format!("{}-{}{}", base, attempt, extension)
            };
            let dest = self.config.directory.join(&candidate);

            if fs::symlink_metadata(&dest).await.is_ok() {
                debug!(candidate = %candidate, attempt, "name taken, probing next");
                continue;
            }

            // The existence probe above is only a pre-filter; the no-clobber
            // rename decides races between concurrent uploads.
            let outcome = tokio::task::spawn_blocking(move || staged.persist_noclobber(dest))
                .await
                .map_err(|e| StoreError::WriteFailed {
                    name: candidate.clone(),
                    source: io::Error::other(e),
                })?;

            match outcome {
                Ok(_) => return Ok(candidate),
                Err(PersistError { error, file }) if error.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(candidate = %candidate, attempt, "lost naming race, probing next");
                    staged = file;
                }
                Err(PersistError { error, .. }) => {
                    return Err(StoreError::WriteFailed {
                        name: candidate,
                        source: error,
                    })
                }
            }
        }

        warn!(name = %name, attempts = self.config.max_name_attempts, "no free name left");
        Err(StoreError::StorageExhausted {
            name: name.to_string(),
            attempts: self.config.max_name_attempts,
        })
    }

    async fn describe_entry(&self, entry: &fs::DirEntry) -> Option<StoredFile> {
        let name = entry.file_name().into_string().ok()?;
        if name.starts_with('.') || !self.sanitizer.has_required_extension(&name) {
            return None;
        }

        let file_type = entry.file_type().await.ok()?;
        if !file_type.is_file() {
            return None;
        }

        // The entry may have been removed since the directory was read.
        let meta = entry.metadata().await.ok()?;

        Some(StoredFile {
            public_url: self.public_url(&name),
            size_bytes: meta.len(),
            modified_at: modified_time(&meta),
            name,
        })
    }

    fn unavailable(&self, reason: String) -> StoreError {
        StoreError::StorageUnavailable {
            path: self.config.directory.clone(),
            reason,
        }
    }

    fn escape(&self, claimed_name: &str) -> StoreError {
        warn!(name = %claimed_name, "refused delete outside managed directory");
        StoreError::PathEscape {
            name: claimed_name.to_string(),
        }
    }
}

/// Runs a blocking filesystem call off the async worker threads.
async fn run_blocking<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(io::Error::other)?
}

async fn read_head<R>(content: &mut R, limit: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(limit);
    content.take(limit as u64).read_to_end(&mut head).await?;
    Ok(head)
}

fn modified_time(meta: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    meta.modified().ok().map(DateTime::<Utc>::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PDF: &[u8] = b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n1 0 obj\n<< >>\nendobj\n%%EOF\n";

    fn create_test_engine(dir: &TempDir) -> StoreEngine {
        let config = StoreConfig {
            directory: dir.path().join("downloads"),
            base_url: "https://example.org/downloads/".to_string(),
            ..StoreConfig::default()
        };
        StoreEngine::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let engine = create_test_engine(&temp_dir);

        assert!(!engine.directory().exists());
        engine.initialize().await.unwrap();
        assert!(engine.directory().is_dir());
    }

    #[tokio::test]
    async fn test_ingest_writes_exact_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let engine = create_test_engine(&temp_dir);

        let stored = engine.ingest("report.pdf", PDF).await.unwrap();
        assert_eq!(stored.name, "report.pdf");
        assert_eq!(stored.size_bytes, PDF.len() as u64);
        assert_eq!(stored.public_url, "https://example.org/downloads/report.pdf");
        assert!(stored.modified_at.is_some());

        let on_disk = std::fs::read(engine.directory().join("report.pdf")).unwrap();
        assert_eq!(on_disk, PDF);
    }

    #[tokio::test]
    async fn test_ingest_streams_content_past_sniff_window() {
        let temp_dir = TempDir::new().unwrap();
        let engine = create_test_engine(&temp_dir);

        let mut content = PDF.to_vec();
        content.extend((0..3 * SNIFF_LEN).map(|i| (i % 251) as u8));

        let stored = engine.ingest("big", content.as_slice()).await.unwrap();
        assert_eq!(stored.name, "big.pdf");
        assert_eq!(stored.size_bytes, content.len() as u64);
        assert_eq!(std::fs::read(engine.directory().join("big.pdf")).unwrap(), content);
    }

    #[tokio::test]
    async fn test_ingest_disambiguates_existing_names() {
        let temp_dir = TempDir::new().unwrap();
        let engine = create_test_engine(&temp_dir);

        let first = engine.ingest("report.pdf", PDF).await.unwrap();
        let second = engine.ingest("report.pdf", PDF).await.unwrap();
        let third = engine.ingest("REPORT.pdf", PDF).await.unwrap();
        let fourth = engine.ingest("report.pdf", PDF).await.unwrap();

        assert_eq!(first.name, "report.pdf");
        assert_eq!(second.name, "report-1.pdf");
        assert_eq!(third.name, "REPORT.pdf");
        assert_eq!(fourth.name, "report-2.pdf");
    }

    #[tokio::test]
    async fn test_ingest_respects_attempt_cap() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            directory: temp_dir.path().to_path_buf(),
            max_name_attempts: 2,
            ..StoreConfig::default()
        };
        let engine = StoreEngine::new(config).unwrap();

        for _ in 0..3 {
            engine.ingest("full.pdf", PDF).await.unwrap();
        }
        let result = engine.ingest("full.pdf", PDF).await;
        assert!(matches!(result, Err(StoreError::StorageExhausted { attempts: 2, .. })));
        assert_eq!(engine.list_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_rejected_uploads_leave_nothing_behind() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            directory: temp_dir.path().to_path_buf(),
            max_file_size: 64,
            ..StoreConfig::default()
        };
        let engine = StoreEngine::new(config).unwrap();

        let text = engine.ingest("notes.pdf", &b"plain text"[..]).await;
        assert!(matches!(text, Err(StoreError::InvalidContentType { .. })));

        let mut large = PDF.to_vec();
        large.resize(65, b' ');
        let too_large = engine.ingest("large.pdf", large.as_slice()).await;
        assert!(matches!(too_large, Err(StoreError::FileTooLarge { size: 65, max_size: 64 })));

        let bad_name = engine.ingest("../..", PDF).await;
        assert!(matches!(bad_name, Err(StoreError::InvalidName { .. })));

        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stored_files_are_not_executable() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let engine = create_test_engine(&temp_dir);

        let stored = engine.ingest("perm.pdf", PDF).await.unwrap();
        let mode = std::fs::metadata(engine.directory().join(&stored.name))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[tokio::test]
    async fn test_remove_deletes_file() {
        let temp_dir = TempDir::new().unwrap();
        let engine = create_test_engine(&temp_dir);

        engine.ingest("gone.pdf", PDF).await.unwrap();
        engine.remove("gone.pdf").await.unwrap();
        assert!(!engine.directory().join("gone.pdf").exists());
    }

    #[tokio::test]
    async fn test_remove_rejects_bad_names() {
        let temp_dir = TempDir::new().unwrap();
        let engine = create_test_engine(&temp_dir);
        engine.initialize().await.unwrap();

        for name in ["", "   ", "notes.txt", ".pdf", "a.pdf\0"] {
            assert!(
                matches!(engine.remove(name).await, Err(StoreError::InvalidName { .. })),
                "{name:?} should be an invalid name"
            );
        }
    }

    #[tokio::test]
    async fn test_remove_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let engine = create_test_engine(&temp_dir);
        engine.ingest("kept.pdf", PDF).await.unwrap();

        let result = engine.remove("missing.pdf").await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
        assert!(engine.directory().join("kept.pdf").exists());
    }

    #[tokio::test]
    async fn test_remove_directory_named_like_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let engine = create_test_engine(&temp_dir);
        engine.initialize().await.unwrap();
        std::fs::create_dir(engine.directory().join("folder.pdf")).unwrap();

        let result = engine.remove("folder.pdf").await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
        assert!(engine.directory().join("folder.pdf").is_dir());
    }

    #[tokio::test]
    async fn test_list_skips_foreign_entries() {
        let temp_dir = TempDir::new().unwrap();
        let engine = create_test_engine(&temp_dir);

        engine.ingest("a.pdf", PDF).await.unwrap();
        engine.ingest("b", PDF).await.unwrap();
        std::fs::write(engine.directory().join("notes.txt"), b"text").unwrap();
        std::fs::write(engine.directory().join(".intake-abc.part"), b"partial").unwrap();
        std::fs::create_dir(engine.directory().join("nested.pdf")).unwrap();

        let mut names: Vec<String> = engine
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
    }

    #[tokio::test]
    async fn test_list_is_restartable() {
        let temp_dir = TempDir::new().unwrap();
        let engine = create_test_engine(&temp_dir);
        engine.ingest("one.pdf", PDF).await.unwrap();

        assert_eq!(engine.list_all().await.unwrap().len(), 1);
        engine.ingest("two.pdf", PDF).await.unwrap();
        assert_eq!(engine.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_status_reports_contents() {
        let temp_dir = TempDir::new().unwrap();
        let engine = create_test_engine(&temp_dir);
        engine.ingest("one.pdf", PDF).await.unwrap();
        engine.ingest("two.pdf", PDF).await.unwrap();

        let status = engine.status().await;
        assert!(status.writable);
        assert_eq!(status.file_count, 2);
        assert_eq!(status.total_bytes, 2 * PDF.len() as u64);
    }

    #[tokio::test]
    async fn test_directory_replaced_by_file_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("downloads");
        std::fs::write(&path, b"not a directory").unwrap();
        let engine = create_test_engine(&temp_dir);

        let result = engine.ingest("x.pdf", PDF).await;
        assert!(matches!(result, Err(StoreError::StorageUnavailable { .. })));
        let result = engine.remove("x.pdf").await;
        assert!(matches!(result, Err(StoreError::StorageUnavailable { .. })));
    }
}
