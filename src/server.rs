//! Shared application context and the HTTP/WebSocket server.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::store::SessionStore;
use crate::{files, gateway, transcribe, AppError, GlobalConfig, Result};

/// Shared application state handed to every route and runner task.
#[derive(Debug)]
pub struct AppCtx {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// Session store.
    pub store: Arc<SessionStore>,
    /// HTTP client for the transcription endpoint.
    pub http: reqwest::Client,
    approval_patterns: Vec<Regex>,
}

impl AppCtx {
    /// Build the context, compiling the approval-prompt pattern set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when a configured pattern is invalid.
    pub fn new(config: Arc<GlobalConfig>, store: Arc<SessionStore>) -> Result<Self> {
        let approval_patterns = config.approval_regexes()?;
        Ok(Self {
            config,
            store,
            http: reqwest::Client::new(),
            approval_patterns,
        })
    }

    /// Whether a non-JSON stdout line looks like an approval prompt.
    #[must_use]
    pub fn approval_matches(&self, text: &str) -> bool {
        self.approval_patterns.iter().any(|re| re.is_match(text))
    }
}

/// Build the application router.
#[must_use]
pub fn router(ctx: Arc<AppCtx>) -> Router {
    Router::new()
        .route("/ws", get(gateway::ws_handler))
        .route("/files", get(files::browse))
        .route("/files/{name}", get(files::serve))
        .route("/transcribe", post(transcribe::handle))
        // Audio uploads routinely exceed the 2 MiB default.
        .layer(DefaultBodyLimit::max(32 * 1024 * 1024))
        .with_state(ctx)
}

/// Bind and serve until the cancellation token fires.
///
/// # Errors
///
/// Returns `AppError::Io` when the listen address cannot be bound or
/// the server fails.
pub async fn serve(ctx: Arc<AppCtx>, cancel: CancellationToken) -> Result<()> {
    let addr = ctx.config.listen_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|err| AppError::Io(format!("cannot bind {addr}: {err}")))?;
    info!(%addr, "listening");

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("server error: {err}")))
}
