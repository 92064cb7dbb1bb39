//! Controlled file intake: sanitized names, byte-sniffed content, collision-free
//! storage and contained deletion for a single managed directory, plus the
//! HTTP transport that fronts it.

pub mod config;
pub mod error;
pub mod files;
pub mod handlers;
pub mod middleware;
pub mod models;

pub use config::AppConfig;
pub use error::{AppError, Result};
pub use files::{
    ContentValidator, NameSanitizer, StorageStatus, StoreConfig, StoreEngine, StoreError,
    StoredFile,
};
pub use handlers::{create_file_routes, create_routes};

use axum::{extract::DefaultBodyLimit, middleware as axum_middleware, Router};
use std::{future::IntoFuture, net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::info;

/// Headroom above the file size limit for multipart framing.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub app_name: String,
    pub version: String,
    pub store: StoreEngine,
    pub admin_token: Arc<str>,
}

impl AppState {
    pub fn new(store: StoreEngine, admin_token: impl Into<String>) -> Self {
        Self {
            app_name: "Intake".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store,
            admin_token: Arc::from(admin_token.into()),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let body_limit = usize::try_from(state.store.max_file_size())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let api = create_file_routes().route_layer(axum_middleware::from_fn_with_state(
        state.clone(),
        middleware::auth::require_admin_token,
    ));

    Router::new()
        .merge(create_routes())
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::logging::logging_layer())
        .with_state(state)
}

pub async fn run_server(app: Router, addr: SocketAddr, shutdown_timeout: Duration) -> Result<()> {
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    let mut server = std::pin::pin!(server.into_future());

    tokio::select! {
        result = &mut server => result?,
        _ = async {
            shutdown_signal().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            tracing::warn!("Graceful shutdown timed out after {:?}", shutdown_timeout);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
