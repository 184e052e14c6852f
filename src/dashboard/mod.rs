//! Status API: axum web server for quota and schedule monitoring.
//!
//! Serves a small JSON API over the ledger, the priority engine and the
//! dispatcher, plus a manual run trigger. CORS enabled for local tooling.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub use routes::{AppState, DashboardState};

/// Bind the status API port and serve it in the background.
pub async fn spawn_dashboard(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind status API port {port}"))?;
    info!(port, "Status API listening on http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Status API server stopped");
        }
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/quota", get(routes::get_quota))
        .route("/api/quota/history", get(routes::get_quota_history))
        .route("/api/quota/competitions", get(routes::get_competition_usage))
        .route("/api/quota/health", get(routes::get_ledger_health))
        .route("/api/schedule", get(routes::get_schedule))
        .route("/api/schedule/should-update", get(routes::get_should_update))
        .route("/api/runs", get(routes::get_runs).post(routes::trigger_run))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
