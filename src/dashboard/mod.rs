//! Dashboard — Axum web server for live pool discovery.
//!
//! Serves a JSON snapshot API, an SSE live stream and a self-contained
//! HTML page. CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    response::Html,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::engine::CancelToken;
use routes::AppState;

/// The embedded dashboard HTML (compiled into the binary).
const DASHBOARD_HTML: &str = include_str!("templates/index.html");

/// Start the dashboard web server in a background task.
///
/// The server stops accepting connections once `cancel` fires, and open
/// live streams are closed by the state's own shutdown token.
pub fn spawn_dashboard(state: AppState, port: u16, cancel: CancelToken) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let listener = bind(port).await?;
        serve(listener, state, cancel).await
    })
}

async fn bind(port: u16) -> Result<TcpListener> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))
}

async fn serve(listener: TcpListener, state: AppState, cancel: CancelToken) -> Result<()> {
    let app = build_router(state);
    let port = listener.local_addr().map(|a| a.port()).unwrap_or_default();
    info!(port, "Dashboard server starting on http://localhost:{port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("Dashboard server error")?;

    info!("Dashboard server stopped");
    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // API routes
        .route("/api/events", get(routes::list_events))
        .route("/api/events/stream", get(routes::stream_events))
        .route("/api/stats", get(routes::get_stats))
        .route("/health", get(routes::health))
        // Dashboard HTML
        .route("/", get(serve_dashboard))
        .layer(cors)
        .with_state(state)
}

/// Serve the embedded HTML dashboard.
async fn serve_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
