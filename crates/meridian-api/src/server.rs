//! API server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use meridian_proxy::PredictionProxy;
use meridian_publish::PublishOrchestrator;
use meridian_registry::ModelRegistry;

use crate::auth::{require_identity, Authenticator};
use crate::handlers;

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to bind the server
    pub addr: SocketAddr,
    /// Path prefix for every API route (e.g. `/api/v1`)
    pub api_prefix: String,
}

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Bearer token verification
    pub auth: Arc<dyn Authenticator>,
    /// Model lifecycle
    pub registry: Arc<ModelRegistry>,
    /// Prediction forwarding
    pub proxy: Arc<PredictionProxy>,
    /// Publishing orchestration
    pub publisher: Arc<PublishOrchestrator>,
}

/// Build the application router.
///
/// Everything under `api_prefix` requires a bearer token; `/healthz` does not.
pub fn build_router(state: AppState, api_prefix: &str) -> Router {
    let api = Router::new()
        .route(
            "/models",
            get(handlers::list_models).post(handlers::create_model),
        )
        .route(
            "/models/{name}",
            get(handlers::get_model)
                .put(handlers::update_model)
                .delete(handlers::delete_model),
        )
        .route("/models/{name}/predict", post(handlers::predict))
        .route("/models/{name}/logs", get(handlers::model_logs))
        .route(
            "/models/{name}/publish",
            get(handlers::get_published)
                .post(handlers::publish)
                .put(handlers::update_publish)
                .delete(handlers::unpublish),
        )
        .route(
            "/models/{name}/publish/rotate-key",
            post(handlers::rotate_key),
        )
        .route("/published-models", get(handlers::list_published))
        .route("/frameworks", get(handlers::list_frameworks))
        .route_layer(from_fn_with_state(state.auth.clone(), require_identity));

    let prefix = api_prefix.trim_matches('/');
    let router = if prefix.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(&format!("/{}", prefix), api)
    };

    router
        .route("/healthz", get(handlers::healthz))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until ctrl-c
pub async fn start_server(config: ServerConfig, state: AppState) -> std::io::Result<()> {
    let app = build_router(state, &config.api_prefix);
    let listener = TcpListener::bind(config.addr).await?;

    info!(addr = %config.addr, prefix = %config.api_prefix, "starting API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
