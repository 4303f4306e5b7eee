//! # Interview Voice Backend - Main Application Entry Point
//!
//! The gateway between browser interview clients and the hosted
//! conversational voice agent. Browsers connect over `/ws/interview` and
//! stream microphone frames; this service frames, encodes, and relays them
//! over a duplex channel to the agent, schedules the synthesized speech that
//! comes back, and scores the transcript once the interview ends.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML + environment)
//! - **state**: shared state, metrics, and the session registry
//! - **audio**: framing, transport codec, playback scheduling
//! - **agent**: duplex channel, prompt building, generation collaborators
//! - **interview**: turn machine, transcript, session lifecycle
//! - **websocket**: the browser-facing actor
//! - **handlers / health / middleware**: the HTTP surface around it

mod agent;
mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod interview;
mod middleware;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set by the signal handler task; polled by the main select loop.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting interview-voice-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{} (agent model: {})",
        config.server.host, config.server.port, config.agent.model
    );

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::Telemetry)
            // The realtime session endpoint
            .route("/ws/interview", web::get().to(websocket::interview_websocket))
            // JSON API
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route(
                        "/sessions/{session_id}/evaluate",
                        web::post().to(handlers::retry_evaluation),
                    )
                    .route(
                        "/sessions/{session_id}/transcript",
                        web::get().to(handlers::get_transcript),
                    ),
            )
            // Root-level health check for load balancers
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Structured logging to the console; `RUST_LOG` overrides the default
/// filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "interview_voice_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Translate SIGTERM/SIGINT into the shutdown flag so in-flight requests can
/// finish before the process exits.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
