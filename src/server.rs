//!
//! opensprint HTTP server
//! ----------------------
//! Axum-based JSON API for the tracker.
//!
//! Responsibilities:
//! - Bearer-token authentication middleware (`require_auth`, `optional_auth`) that inserts an
//!   immutable `RequestContext` into the request extensions.
//! - Route groups under `/api/auth`, `/api/projects`, `/api/issues`, plus a public `/health`.
//! - The production-only per-address rate limiter and its background sweeper.
//! - Startup logging of the effective configuration and graceful shutdown on Ctrl-C or SIGTERM.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::AppResult;
use crate::identity::{Authenticator, Identity, LocalAuthProvider, RequestContext, TokenService};
use crate::storage::SharedStore;

pub mod auth_routes;
pub mod issue_routes;
pub mod project_routes;
pub mod rate_limit;
pub mod response;

use rate_limit::RateLimiter;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub config: Arc<Config>,
    pub authenticator: Authenticator,
    pub provider: LocalAuthProvider,
    /// Present only in production.
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

impl AppState {
    pub fn new(config: Config, store: SharedStore) -> Self {
        let tokens = TokenService::new(config.jwt_secret.as_bytes());
        let demo_identity = config.demo_mode.then(|| Identity::demo(&config.demo));
        let demo_settings = config.demo_mode.then(|| config.demo.clone());
        let authenticator = Authenticator::new(tokens.clone(), Arc::new(store.clone()), demo_identity);
        let provider = LocalAuthProvider::new(store.clone(), tokens, demo_settings);
        let rate_limiter = config
            .is_production()
            .then(|| Arc::new(RateLimiter::new(config.rate_limit_max, config.rate_limit_window)));
        Self { store, config: Arc::new(config), authenticator, provider, rate_limiter }
    }
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Reject the request with 401 unless it carries a valid token for an active user.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> AppResult<Response> {
    let identity = state.authenticator.authenticate(req.headers())?;
    let ctx = RequestContext::authenticated(identity, request_id(req.headers()));
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Attach the caller's identity when the token resolves; otherwise continue anonymously.
pub async fn optional_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let rid = request_id(req.headers());
    let ctx = match state.authenticator.authenticate_optional(req.headers()) {
        Some(identity) => RequestContext::authenticated(identity, rid),
        None => RequestContext::anonymous(rid),
    };
    req.extensions_mut().insert(ctx);
    next.run(req).await
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "features": { "auth": "simple", "audit": false, "webhooks": false },
    }))
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .nest("/auth", auth_routes::router(&state))
        .nest("/projects", project_routes::router(&state))
        .nest("/issues", issue_routes::router(&state));
    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(from_fn_with_state(state.clone(), rate_limit::enforce))
        .with_state(state)
}

fn log_startup(config: &Config, addr: &SocketAddr) {
    info!(
        target: "startup",
        "opensprint starting: addr={}, env={}, demo_mode={}, rate_limit={}, snapshot={:?}",
        addr,
        config.environment.as_str(),
        config.demo_mode,
        if config.is_production() { config.rate_limit_max.to_string() } else { "off".to_string() },
        config.snapshot_path()
    );
}

/// Serve `app` on `listener` until `shutdown` resolves, then let in-flight requests finish.
pub async fn serve<F>(listener: tokio::net::TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutting down gracefully");
}

/// Open the store, assemble the router and serve until a shutdown signal arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = match config.snapshot_path() {
        Some(path) => SharedStore::open(&path).with_context(|| format!("While opening store snapshot {}", path.display()))?,
        None => SharedStore::in_memory(),
    };
    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    log_startup(&config, &addr);

    let state = AppState::new(config, store);
    if let Some(limiter) = state.rate_limiter.clone() {
        rate_limit::spawn_sweeper(limiter, SWEEP_INTERVAL);
    }
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Starting server on {}", addr);
    serve(listener, app, shutdown_signal()).await?;
    info!("Server stopped");
    Ok(())
}
