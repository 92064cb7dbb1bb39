pub mod error;
pub mod manager;
pub mod models;
pub mod sanitize;
pub mod validation;

pub use error::StoreError;
pub use manager::{StoreConfig, StoreEngine};
pub use models::{format_size, StorageStatus, StoredFile};
pub use sanitize::NameSanitizer;
pub use validation::ContentValidator;
