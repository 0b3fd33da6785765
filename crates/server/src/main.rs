//! Standalone MCP server speaking the streamable HTTP transport.

mod auth;
mod config;
mod dispatcher;

use anyhow::Context as _;
use axum::Router;
use axum::response::Json;
use axum::routing::get;
use clap::{Parser, ValueEnum};
use mcp_http_stream::{ResponseMode, Transport};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::auth::ApiKeyAuthorizer;
use crate::config::{ServerConfig, load_config};
use crate::dispatcher::BuiltinDispatcher;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML config file
    #[arg(long, env = "MCP_HTTP_STREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address; overrides `bind` from the config file
    #[arg(long, env = "MCP_HTTP_STREAM_BIND")]
    bind: Option<SocketAddr>,

    /// Default log filter when `RUST_LOG` is unset
    #[arg(long, env = "MCP_HTTP_STREAM_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "MCP_HTTP_STREAM_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Require this key on every request (`x-api-key` or `Authorization: Bearer`)
    #[arg(long, env = "MCP_HTTP_STREAM_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Override `transport.responseMode` (stream|batch)
    #[arg(long, env = "MCP_HTTP_STREAM_RESPONSE_MODE")]
    response_mode: Option<ResponseMode>,
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.compact().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_format);

    let mut cfg = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(mode) = args.response_mode {
        cfg.transport.response_mode = mode;
    }
    if args.api_key.is_some() {
        cfg.api_key = args.api_key;
    }
    let bind = args.bind.unwrap_or_else(|| cfg.bind_addr());

    let dispatcher = Arc::new(BuiltinDispatcher::new(cfg.server_name()));
    let transport = match cfg.api_key() {
        Some(key) => Transport::with_authorizer(
            cfg.transport.clone(),
            dispatcher,
            Arc::new(ApiKeyAuthorizer::new(key)),
        ),
        None => Transport::new(cfg.transport.clone(), dispatcher),
    }
    .context("build transport")?;
    let sweeper = transport.spawn_sweeper();

    let app = Router::new()
        .route("/health", get(health))
        .merge(mcp_http_stream::router(transport.clone()));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    tracing::info!(
        %bind,
        endpoint = %cfg.transport.endpoint,
        response_mode = ?cfg.transport.response_mode,
        auth = cfg.api_key().is_some(),
        "listening"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let draining = transport.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            // Open SSE bodies only end once their sessions are gone.
            draining.shutdown();
        })
        .await
        .context("serve")?;

    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "session sweeper task failed");
    }
    tracing::info!("server stopped");
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
