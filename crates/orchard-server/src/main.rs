mod config;

use std::sync::Arc;

use axum::{Router, http::StatusCode};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use orchard_api::{AppState, AppStateInner, ImageStore};
use orchard_db::Database;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orchard=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {e:#}");
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    // Blocks with retries until the store answers or attempts run out.
    let opts = config.connect_options();
    let db = tokio::task::spawn_blocking(move || Database::connect(&opts)).await??;

    let repaired = db.meadows().reconcile_tree_ids(None)?;
    if repaired > 0 {
        warn!("Repaired tree lists of {} meadows at startup", repaired);
    }

    let images = ImageStore::new(config.upload_dir.clone()).await?;
    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        images,
    });

    let app: Router = orchard_api::router(state.clone())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Orchard server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match Arc::try_unwrap(state) {
        Ok(inner) => {
            if let Err(e) = inner.db.close() {
                error!("Failed to close database cleanly: {}", e);
            }
        }
        Err(_) => warn!("Database still in use at shutdown, leaving it to drop"),
    }

    info!("Orchard server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
