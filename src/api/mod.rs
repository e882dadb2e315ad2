//! HTTP server for the relay
//!
//! One WebSocket route carrying voice sessions, plus a health endpoint.

pub mod websocket;

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::security::TokenValidator;
use crate::session::SessionEngines;

/// Transport limits; configuration, not protocol
#[derive(Debug, Clone, Copy)]
pub struct TransportLimits {
    /// Maximum inbound WebSocket message size in bytes
    pub max_message_bytes: usize,

    /// Close connections with no inbound traffic for this long
    pub idle_timeout: Option<Duration>,
}

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub validator: Arc<TokenValidator>,
    pub engines: SessionEngines,
    pub limits: TransportLimits,
}

/// Build the relay router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .merge(websocket::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn health() -> &'static str {
    "ok"
}

/// Bind and serve until interrupted
///
/// # Errors
///
/// Returns error if the listener cannot bind or the server fails
pub async fn serve(state: ApiState, host: &str, port: u16) -> Result<()> {
    let app = router(Arc::new(state));
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
