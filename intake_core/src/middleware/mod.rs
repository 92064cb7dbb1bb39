//! Middleware components for the intake server

pub mod auth;
pub mod logging;

pub use auth::require_admin_token;
pub use logging::logging_layer;
