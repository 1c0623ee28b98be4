//! # Account Bridge
//!
//! HTTP bridge in front of any number of linked messaging accounts. Each account is a
//! session with its own credentials, message history and pairing flow.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, config.toml, environment)
//! - **session**: per-account state machine and the registry that owns all sessions
//! - **client**: boundary to the messaging service, plus the simulated backend
//! - **store**: per-session credentials and SQLite message history
//! - **audio**: Ogg/Opus voice-note analysis and waveform synthesis
//! - **webhook**: forwards incoming messages to an external endpoint
//! - **handlers / health / middleware / state**: the HTTP surface

mod audio;
mod client;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod session;
mod state;
mod store;
mod webhook;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use crate::config::AppConfig;
use crate::state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::client::SimulatedClientFactory;
use crate::session::SessionRegistry;
use crate::webhook::WebhookNotifier;

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load().context("loading configuration")?;
    config.validate()?;

    info!("Starting account-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        store_dir = %config.store.dir,
        backend = %config.client.backend,
        "Configuration loaded"
    );

    let webhook = match config.webhook_url() {
        Some(url) => {
            let notifier =
                WebhookNotifier::new(url, Duration::from_secs(config.webhook.timeout_secs))?;
            info!(
                host = notifier.host().as_deref().unwrap_or("-"),
                "Forwarding incoming messages to webhook"
            );
            Some(Arc::new(notifier))
        }
        None => {
            info!("Webhook disabled");
            None
        }
    };

    let factory = Arc::new(SimulatedClientFactory::new((&config.client).into()));
    let registry = Arc::new(SessionRegistry::new(config.store_dir(), factory, webhook));

    let restored = registry.restore_all();
    for (session_id, reason) in &restored.failed {
        warn!(session_id = %session_id, reason = %reason, "Session left unrestored");
    }

    let app_state = AppState::new(config.clone(), registry.clone());
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
            .app_data(web::PayloadConfig::new(handlers::MAX_AUDIO_BYTES))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(handlers::configure)
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)
    .with_context(|| format!("binding {}", bind_addr))?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    registry.shutdown().await;
    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` wins; otherwise `account_bridge=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "account_bridge=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(())
}

fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
