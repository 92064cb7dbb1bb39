//! HTTP handlers

pub mod files;
pub mod routes;

pub use files::create_file_routes;
pub use routes::create_routes;
