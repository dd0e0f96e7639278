#![forbid(unsafe_code)]

//! `session-relay` — session-relay server binary.
//!
//! Bootstraps configuration, restores the session store from its
//! snapshot, and serves the WebSocket channel plus the file-browser and
//! transcription routes.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use session_relay::server::{self, AppCtx};
use session_relay::store::SessionStore;
use session_relay::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "session-relay", about = "Session-relay server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured listen address.
    #[arg(long)]
    listen: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("session-relay server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config_text = std::fs::read_to_string(&args.config)
        .map_err(|err| AppError::Config(format!("cannot read config: {err}")))?;
    let mut config = GlobalConfig::from_toml_str(&config_text)?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    config.load_credentials()?;
    let config = Arc::new(config);
    info!("configuration loaded");

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .map_err(|err| AppError::Config(format!("cannot create upload dir: {err}")))?;

    // ── Restore session store ───────────────────────────
    let store = Arc::new(SessionStore::new(
        config.state_file.clone(),
        config.buffer_capacity,
        config.job.default_model.clone(),
    ));
    let restored = store.load().await?;
    info!(restored, "session store ready");

    let ctx = Arc::new(AppCtx::new(Arc::clone(&config), Arc::clone(&store))?);

    // ── Serve until shutdown ────────────────────────────
    let ct = CancellationToken::new();
    let server_ct = ct.clone();
    let server_ctx = Arc::clone(&ctx);
    let server_handle = tokio::spawn(async move { server::serve(server_ctx, server_ct).await });

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    // ── Persist final state ─────────────────────────────
    store.save().await;

    match server_handle.await {
        Ok(result) => result?,
        Err(err) => tracing::error!(%err, "server task panicked"),
    }
    info!("session-relay shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
