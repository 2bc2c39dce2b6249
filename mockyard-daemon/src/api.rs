//! HTTP adapter over the config store and the instance registry

mod error;
mod handlers;

pub use error::ApiError;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use mockyard_protocol::protocol::MAX_CONFIG_SIZE;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config_store::ConfigStore;
use crate::errors::DaemonError;
use crate::registry::InstanceRegistry;

/// Room for multipart boundaries and part headers on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<InstanceRegistry>,
    pub store: Arc<ConfigStore>,
    /// Include internal error details in responses
    pub development: bool,
}

impl AppState {
    pub fn new(registry: Arc<InstanceRegistry>, development: bool) -> Self {
        Self {
            store: registry.store().clone(),
            registry,
            development,
        }
    }

    fn error(&self, err: DaemonError) -> ApiError {
        ApiError::from_daemon(err, self.development)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/mock/start", post(handlers::start))
        .route("/api/mock/stop", post(handlers::stop))
        .route("/api/mock/status", get(handlers::status))
        .route("/api/mock/upload", post(handlers::upload))
        .route("/api/mock/configs", get(handlers::list_configs))
        .route(
            "/api/mock/configs/:filename",
            axum::routing::delete(handlers::delete_config),
        )
        .route(
            "/api/mock/configs/:filename/download",
            get(handlers::download_config),
        )
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(
            MAX_CONFIG_SIZE as usize + MULTIPART_OVERHEAD,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
