//! HTTP server implementation using Axum.

use crate::handlers::{handle_health, handle_rpc, handle_training_webhook};
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use trainsync_core::{CancellationToken, TrainsyncApi};

/// Requests handled at once; the rest queue in the listener.
const MAX_CONCURRENT_REQUESTS: usize = 64;

/// Application state shared across handlers.
pub struct AppState {
    pub api: TrainsyncApi,
    /// Cancelled on shutdown; passed to long reconciliation passes.
    pub shutdown: CancellationToken,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/rpc", post(handle_rpc))
        .route("/webhook/training", post(handle_training_webhook))
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// A running server. `task` finishes once in-flight requests drain after
/// the shutdown token fires.
pub struct ServerHandle {
    pub addr: SocketAddr,
    pub task: JoinHandle<()>,
}

/// Start the HTTP server.
///
/// `addr` is the actual bound address (useful when port=0).
pub async fn start_server(
    api: TrainsyncApi,
    shutdown: CancellationToken,
    host: &str,
    port: u16,
) -> anyhow::Result<ServerHandle> {
    let state = Arc::new(AppState {
        api,
        shutdown: shutdown.clone(),
    });
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    let task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            error!("Server error: {}", e);
        }
        info!("Server stopped");
    });

    Ok(ServerHandle {
        addr: actual_addr,
        task,
    })
}
