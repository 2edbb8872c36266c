use anyhow::{Context, Result};
use axum::{extract::DefaultBodyLimit, routing::get, Router};
use std::{net::SocketAddr, path::Path, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    config::ObservabilityConfig,
    handlers::request_details::{self, RequestDetailsState},
    observability::{RequestDetailsDb, RequestDetailsWriter, ShutdownCoordinator},
    signals::setup_signal_handlers,
};

/// Largest accepted ingest body; payloads beyond the per-field limit are
/// truncated on write anyway
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Start the request details server
///
/// This function:
/// 1. Opens the SQLite store and applies migrations
/// 2. Creates the buffered writer
/// 3. Sets up signal handlers for graceful shutdown
/// 4. Serves requests until a shutdown signal arrives
/// 5. Drains the writer buffer before returning
pub async fn start_server(host: &str, port: u16, config: ObservabilityConfig) -> Result<()> {
    let addr = SocketAddr::from((
        host.parse::<std::net::IpAddr>()
            .with_context(|| format!("Invalid host address '{}'", host))?,
        port,
    ));

    info!(database = %config.database_path, "Opening request details database...");
    let db = Arc::new(
        RequestDetailsDb::open(Path::new(&config.database_path))
            .await
            .context("Failed to open request details database")?,
    );

    info!(
        max_records = config.max_records,
        batch_size = config.batch_size,
        flush_interval_ms = config.flush_interval_ms,
        max_json_size_kb = config.max_json_size_kb,
        "Request details writer configured"
    );
    let writer = RequestDetailsWriter::new(db, config);
    let coordinator = ShutdownCoordinator::new(writer.clone());

    let (shutdown_tx, signal_handle) = setup_signal_handlers()?;
    let mut shutdown_rx = shutdown_tx.subscribe();

    let app = create_router(RequestDetailsState::new(writer));

    info!("Starting request details API on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, draining connections...");
        })
        .await;

    // Drain even when serving failed, buffered events are otherwise lost
    let report = coordinator.shutdown().await;
    signal_handle.abort();
    served?;

    info!(
        flushed = report.flushed,
        failed = report.failed,
        timed_out = report.timed_out,
        "Server stopped gracefully"
    );

    Ok(())
}

/// Create the Axum router with all routes and middleware
pub fn create_router(state: RequestDetailsState) -> Router {
    Router::new()
        .route(
            "/api/usage/request-details",
            get(request_details::list_request_details).post(request_details::submit_request_detail),
        )
        .route(
            "/api/usage/request-details/:id",
            get(request_details::get_request_detail),
        )
        .route("/api/usage/providers", get(request_details::list_providers))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
