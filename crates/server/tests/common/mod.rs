#![allow(dead_code)]

use anyhow::Context as _;
use serde_json::Value;
use std::path::Path;

pub use mcp_test_support::ServerProcess;

pub const SESSION_HEADER: &str = "Mcp-Session-Id";

pub async fn start_server(config_yaml: &str, extra_args: &[&str]) -> anyhow::Result<ServerProcess> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let cfg_path = dir.path().join("config.yaml");
    std::fs::write(&cfg_path, config_yaml).context("write config")?;
    start_with_config_path(&cfg_path, extra_args).await
}

async fn start_with_config_path(
    cfg_path: &Path,
    extra_args: &[&str],
) -> anyhow::Result<ServerProcess> {
    let cfg = cfg_path.to_str().context("config path is not utf-8")?;
    let mut args = vec!["--config", cfg, "--log-level", "info"];
    args.extend_from_slice(extra_args);
    // Read at startup; the temp dir may be removed once /health answers.
    ServerProcess::start(env!("CARGO_BIN_EXE_mcp-http-stream-server"), &args).await
}

pub async fn post_mcp(
    client: &reqwest::Client,
    server: &ServerProcess,
    session_id: Option<&str>,
    body: &Value,
) -> anyhow::Result<reqwest::Response> {
    let mut req = client
        .post(server.url("/mcp"))
        .header("Accept", "application/json, text/event-stream")
        .json(body);
    if let Some(session_id) = session_id {
        req = req.header(SESSION_HEADER, session_id);
    }
    req.send().await.context("POST /mcp")
}

pub async fn get_stream(
    client: &reqwest::Client,
    server: &ServerProcess,
    session_id: &str,
    last_event_id: Option<&str>,
) -> anyhow::Result<reqwest::Response> {
    let mut req = client
        .get(server.url("/mcp"))
        .header("Accept", "text/event-stream")
        .header(SESSION_HEADER, session_id);
    if let Some(id) = last_event_id {
        req = req.header("Last-Event-ID", id);
    }
    req.send().await.context("GET /mcp")
}

pub fn session_id(resp: &reqwest::Response) -> anyhow::Result<String> {
    Ok(resp
        .headers()
        .get(SESSION_HEADER)
        .and_then(|h| h.to_str().ok())
        .context("missing Mcp-Session-Id header")?
        .to_string())
}
