//! # Media Transcriber - Main Application Entry Point
//!
//! HTTP service that accepts audio/video uploads, transcribes them with an
//! external Whisper engine, and keeps per-file metadata in SQLite.
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, config.toml, environment)
//! - **error**: `AppError` and its HTTP mapping
//! - **storage**: Filename sanitizing and the upload/transcript directories
//! - **database**: SQLite pool, migrations and the metadata repository
//! - **transcription**: `Transcriber` trait and the Whisper CLI backend
//! - **pipeline**: Upload → transcribe → persist, queries and deletion
//! - **state**: Shared application state and metrics
//! - **health**: Health and metrics endpoints
//! - **middleware**: Request logging and per-route metrics
//! - **handlers**: File API and the static frontend fallback

mod config;
mod database;
mod error;
mod handlers;
mod health;
mod middleware;
mod pipeline;
mod state;
mod storage;
mod transcription;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{Context, Result};
use crate::config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::WhisperCli;

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// ## Startup Order:
/// 1. Load `.env`, set up tracing
/// 2. Load and validate configuration
/// 3. Build state: storage roots, database + migrations, reconciliation
/// 4. Serve until the server fails or a shutdown signal arrives
/// 5. Stop gracefully and close the database pool
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    match config.to_toml() {
        Ok(rendered) => debug!("Effective configuration:\n{}", rendered),
        Err(e) => debug!("Could not render configuration: {:#}", e),
    }

    let transcriber = Arc::new(WhisperCli::new(&config.transcription));
    let app_state = AppState::initialize(config.clone(), transcriber)
        .await
        .context("Failed to initialize application state")?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let mut server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(server_state.clone()))
            // Middleware executes in reverse order of registration for requests
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(health::configure)
            .service(web::scope("/api").configure(handlers::files::configure))
            .default_service(web::to(handlers::frontend_fallback))
    });

    if config.server.workers > 0 {
        server = server.workers(config.server.workers);
    }

    let server = server
        .bind(&bind_addr)
        .with_context(|| format!("Failed to bind {}", bind_addr))?
        .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => info!("Server exited"),
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    app_state.service.database().close().await;
    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls the filter; defaults to `media_transcriber=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "media_transcriber=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Listen for SIGINT/SIGTERM in the background and raise [`SHUTDOWN_SIGNAL`].
///
/// A handler that cannot be installed is logged and the server keeps running.
fn setup_signal_handlers() {
    tokio::spawn(async {
        #[cfg(unix)]
        let received = {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            info!("Received SIGTERM");
                            true
                        }
                        result = tokio::signal::ctrl_c() => log_ctrl_c(result),
                    }
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    log_ctrl_c(tokio::signal::ctrl_c().await)
                }
            }
        };

        #[cfg(not(unix))]
        let received = log_ctrl_c(tokio::signal::ctrl_c().await);

        if received {
            SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
        }
    });
}

fn log_ctrl_c(result: std::io::Result<()>) -> bool {
    match result {
        Ok(()) => {
            info!("Received SIGINT");
            true
        }
        Err(e) => {
            error!("Failed to listen for SIGINT: {}", e);
            false
        }
    }
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
