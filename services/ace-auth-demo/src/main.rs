//! AceAuth demo service
//!
//! Single-binary web app that signs browsers in through an AceAuth-style
//! authorization server:
//! 1. /login redirects to the authorize endpoint with a fresh state
//! 2. /callback validates the state, exchanges the code and stores the profile
//! 3. /me, /renew and /logout work off the stored session

mod config;
mod error;
mod handlers;
mod sessions;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ace_auth::AuthFlowConfig;
use transport::{HttpTransport, ReqwestTransport};

use crate::config::Config;
use crate::sessions::SessionRegistry;

/// Time allowed for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    auth: AuthFlowConfig,
    transport: Arc<dyn HttpTransport>,
    sessions: SessionRegistry,
    post_logout_redirect: Option<String>,
    started_at: Instant,
}

impl AppState {
    fn new(
        auth: AuthFlowConfig,
        transport: Arc<dyn HttpTransport>,
        post_logout_redirect: Option<String>,
        max_sessions: usize,
    ) -> Self {
        let max_age = Duration::from_secs(auth.session.cookie_expires_secs);
        Self {
            auth,
            transport,
            sessions: SessionRegistry::new(max_age, max_sessions),
            post_logout_redirect,
            started_at: Instant::now(),
        }
    }
}

/// Build the axum router with all routes and shared state.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/login", get(handlers::login))
        .route(
            "/callback",
            get(handlers::callback_query).post(handlers::callback_form),
        )
        .route("/me", get(handlers::me))
        .route("/renew", post(handlers::renew))
        .route("/logout", get(handlers::logout))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting ace-auth-demo");

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        domain = %config.auth.flow.domain,
        response_mode = config.auth.flow.response_mode.as_str(),
        "configuration loaded"
    );

    let listen_addr = config.server.listen_addr;
    let state = AppState::new(
        config.auth.flow,
        Arc::new(ReqwestTransport::default()),
        config.server.post_logout_redirect,
        config.server.max_sessions,
    );
    let app = build_router(state, config.server.max_connections);

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    // The drain timer starts at signal receipt
    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Liveness plus a count of tracked browser sessions.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "active_sessions": state.sessions.len().await,
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
