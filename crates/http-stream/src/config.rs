//! Transport configuration.
//!
//! All structs deserialize from camelCase keys and fall back to field defaults, so a config
//! file only needs to mention what it overrides.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SESSION_HEADER: &str = "Mcp-Session-Id";
pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

/// How responses to client requests are delivered. Static per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Responses are pushed over Server-Sent Events.
    #[default]
    Stream,
    /// Responses are written inline as one JSON body.
    Batch,
}

impl std::str::FromStr for ResponseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" => Ok(Self::Stream),
            "batch" => Ok(Self::Batch),
            other => Err(format!("unknown response mode '{other}' (expected stream|batch)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportConfig {
    /// Endpoint path served by [`crate::router`].
    pub endpoint: String,
    pub response_mode: ResponseMode,
    /// Batch mode only: how long a request may wait for the dispatcher.
    pub batch_timeout_ms: u64,
    /// Maximum POST body size in bytes.
    pub max_message_size: usize,
    pub session: SessionConfig,
    pub stream: StreamConfig,
    pub cors: CorsConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "/mcp".to_string(),
            response_mode: ResponseMode::Stream,
            batch_timeout_ms: 30_000,
            max_message_size: 4 * 1024 * 1024,
            session: SessionConfig::default(),
            stream: StreamConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Basic sanity checks; returns a human readable reason on failure.
    ///
    /// # Errors
    ///
    /// Returns an error message describing the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if !self.endpoint.starts_with('/') {
            return Err(format!("endpoint must start with '/': {}", self.endpoint));
        }
        if self.max_message_size == 0 {
            return Err("maxMessageSize must be > 0".to_string());
        }
        if self.session.max_concurrent_sessions == 0 {
            return Err("session.maxConcurrentSessions must be > 0".to_string());
        }
        if self.session.session_timeout_ms == 0 {
            return Err("session.sessionTimeoutMs must be > 0".to_string());
        }
        if self.session.header_name.trim().is_empty() {
            return Err("session.headerName must not be empty".to_string());
        }
        if self.response_mode == ResponseMode::Batch && self.batch_timeout_ms == 0 {
            return Err("batchTimeoutMs must be > 0 in batch mode".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// When false every POST runs in an ephemeral session and no session header is issued.
    pub enabled: bool,
    pub header_name: String,
    pub allow_client_termination: bool,
    pub max_concurrent_sessions: usize,
    pub session_timeout_ms: u64,
    /// Expiry sweep interval. Defaults to a quarter of the session timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_interval_ms: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            header_name: DEFAULT_SESSION_HEADER.to_string(),
            allow_client_termination: true,
            max_concurrent_sessions: 100,
            session_timeout_ms: 300_000,
            sweep_interval_ms: None,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        let ms = self
            .sweep_interval_ms
            .unwrap_or(self.session_timeout_ms / 4)
            .max(10);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamConfig {
    /// Messages retained for a session with no open stream; oldest dropped beyond this.
    pub pending_outbound_limit: usize,
    /// Replay window size (events).
    pub replay_max_events: usize,
    /// Replay window age (milliseconds).
    pub replay_max_age_ms: u64,
    pub keep_alive_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            pending_outbound_limit: 1024,
            replay_max_events: 256,
            replay_max_age_ms: 300_000,
            keep_alive_secs: 15,
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub fn replay_max_age(&self) -> Duration {
        Duration::from_millis(self.replay_max_age_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CorsConfig {
    pub allow_origin: String,
    pub allow_methods: String,
    pub allow_headers: String,
    pub expose_headers: String,
    pub max_age: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: "GET, POST, DELETE, OPTIONS".to_string(),
            allow_headers:
                "Content-Type, Accept, Authorization, x-api-key, Mcp-Session-Id, Last-Event-ID"
                    .to_string(),
            expose_headers: "Content-Type, Authorization, x-api-key, Mcp-Session-Id".to_string(),
            max_age: "86400".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ResponseMode, TransportConfig};

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: TransportConfig = serde_json::from_value(serde_json::json!({
            "responseMode": "batch",
            "session": { "maxConcurrentSessions": 2 }
        }))
        .expect("config");
        assert_eq!(cfg.response_mode, ResponseMode::Batch);
        assert_eq!(cfg.session.max_concurrent_sessions, 2);
        assert_eq!(cfg.session.header_name, "Mcp-Session-Id");
        assert!(cfg.session.allow_client_termination);
        assert_eq!(cfg.endpoint, "/mcp");
        assert_eq!(cfg.max_message_size, 4 * 1024 * 1024);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn sweep_interval_defaults_to_quarter_timeout_with_floor() {
        let mut cfg = TransportConfig::default();
        cfg.session.session_timeout_ms = 100;
        assert_eq!(cfg.session.sweep_interval().as_millis(), 25);
        cfg.session.session_timeout_ms = 8;
        assert_eq!(cfg.session.sweep_interval().as_millis(), 10);
        cfg.session.sweep_interval_ms = Some(50);
        assert_eq!(cfg.session.sweep_interval().as_millis(), 50);
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut cfg = TransportConfig::default();
        cfg.session.max_concurrent_sessions = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn response_mode_parses_case_insensitively() {
        assert_eq!("Batch".parse::<ResponseMode>(), Ok(ResponseMode::Batch));
        assert!("poll".parse::<ResponseMode>().is_err());
    }
}
