use anyhow::Context as _;
use mcp_http_stream::TransportConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SERVER_NAME: &str = "mcp-http-stream";

/// Top-level YAML config file.
///
/// ```yaml
/// bind: 0.0.0.0:8080
/// apiKey: secret
/// transport:
///   responseMode: stream
///   session:
///     maxConcurrentSessions: 100
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub bind: Option<SocketAddr>,
    /// When set, every request must present it via `x-api-key` or `Authorization: Bearer`.
    pub api_key: Option<String>,
    /// Reported in the `initialize` result.
    pub server_name: Option<String>,
    pub transport: TransportConfig,
}

impl ServerConfig {
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))
    }

    #[must_use]
    pub fn server_name(&self) -> &str {
        self.server_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SERVER_NAME)
    }

    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

pub fn load_config(path: &Path) -> anyhow::Result<ServerConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    let cfg: ServerConfig =
        serde_yaml::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    cfg.transport
        .validate()
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("invalid transport settings in {}", path.display()))?;
    Ok(cfg)
}
