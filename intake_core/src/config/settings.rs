use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_ADMIN_TOKEN: &str = "change-me-admin-token";
const MAX_EXTENSION_LEN: usize = 16;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub directory: PathBuf,
    pub base_url: String,
    pub extension: String,
    pub content_type: String,
    pub max_file_size_mb: u64,
    pub max_name_attempts: u32,
    /// Unix permission bits applied to stored files (0o644 = 420).
    pub file_mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub admin_token: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            shutdown_timeout_seconds: 10,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./downloads"),
            base_url: "http://127.0.0.1:3000/downloads".to_string(),
            extension: "pdf".to_string(),
            content_type: mime::APPLICATION_PDF.essence_str().to_string(),
            max_file_size_mb: 25,
            max_name_attempts: 10_000,
            file_mode: 0o644,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_token: DEFAULT_ADMIN_TOKEN.to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults, then `config.toml` if present, then `APP__SECTION__KEY`
    /// environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?);

        if std::path::Path::new("config.toml").exists() {
            builder = builder.add_source(File::with_name("config"));
        }

        builder = builder.add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        app_config.validate()?;

        Ok(app_config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Message("Server port cannot be 0".to_string()));
        }

        if self.storage.directory.as_os_str().is_empty() {
            return Err(ConfigError::Message(
                "Storage directory cannot be empty".to_string(),
            ));
        }

        let extension = self.storage.extension.trim_start_matches('.');
        if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::Message(format!(
                "Storage extension must be alphanumeric, got {:?}",
                self.storage.extension
            )));
        }

        if extension.len() > MAX_EXTENSION_LEN {
            return Err(ConfigError::Message(format!(
                "Storage extension must be at most {} characters",
                MAX_EXTENSION_LEN
            )));
        }

        if self.storage.content_type.parse::<mime::Mime>().is_err() {
            return Err(ConfigError::Message(format!(
                "Storage content type {:?} is not a valid media type",
                self.storage.content_type
            )));
        }

        if self.storage.max_file_size_mb == 0 {
            return Err(ConfigError::Message(
                "Max file size must be greater than 0".to_string(),
            ));
        }

        if self.storage.max_name_attempts == 0 {
            return Err(ConfigError::Message(
                "Max name attempts must be greater than 0".to_string(),
            ));
        }

        if self.storage.file_mode & 0o111 != 0 || self.storage.file_mode & 0o002 != 0 {
            return Err(ConfigError::Message(format!(
                "File mode {:o} must not be executable or world-writable",
                self.storage.file_mode
            )));
        }

        if self.auth.admin_token.trim().is_empty() {
            return Err(ConfigError::Message(
                "Admin token cannot be empty".to_string(),
            ));
        }

        if self.auth.admin_token == DEFAULT_ADMIN_TOKEN {
            tracing::warn!("Using default admin token - change this in production!");
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
