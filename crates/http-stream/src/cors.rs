//! Precomputed CORS header set, applied to every response including preflight.

use crate::config::{CorsConfig, DEFAULT_SESSION_HEADER};
use crate::error::{Result, TransportError};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue};

#[derive(Debug, Clone)]
pub struct CorsHeaders {
    headers: HeaderMap,
}

impl CorsHeaders {
    /// Validate and freeze the configured values.
    ///
    /// `session_header` replaces the default `Mcp-Session-Id` entry in the allow and expose
    /// lists so a renamed session header stays visible to browser clients.
    ///
    /// # Errors
    ///
    /// [`TransportError::Config`] if a value is not a valid header value.
    pub fn from_config(cfg: &CorsConfig, session_header: &str) -> Result<Self> {
        let allow_headers = with_session_header(&cfg.allow_headers, session_header);
        let expose_headers = with_session_header(&cfg.expose_headers, session_header);
        let mut headers = HeaderMap::new();
        for (name, value) in [
            (ACCESS_CONTROL_ALLOW_ORIGIN, cfg.allow_origin.as_str()),
            (ACCESS_CONTROL_ALLOW_METHODS, cfg.allow_methods.as_str()),
            (ACCESS_CONTROL_ALLOW_HEADERS, allow_headers.as_str()),
            (ACCESS_CONTROL_EXPOSE_HEADERS, expose_headers.as_str()),
            (ACCESS_CONTROL_MAX_AGE, cfg.max_age.as_str()),
        ] {
            insert(&mut headers, name, value)?;
        }
        Ok(Self { headers })
    }

    pub fn apply(&self, target: &mut HeaderMap) {
        for (name, value) in &self.headers {
            target.insert(name.clone(), value.clone());
        }
    }
}

fn with_session_header(list: &str, session_header: &str) -> String {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            if entry.eq_ignore_ascii_case(DEFAULT_SESSION_HEADER) {
                session_header.trim()
            } else {
                entry
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Ok(());
    }
    let v = HeaderValue::from_str(value.trim())
        .map_err(|e| TransportError::Config(format!("invalid CORS value for {name}: {e}")))?;
    headers.insert(name, v);
    Ok(())
}
