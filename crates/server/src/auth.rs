use axum::http::{HeaderMap, header};
use mcp_http_stream::Authorizer;

/// Accepts requests presenting the configured key via `x-api-key` or `Authorization: Bearer`.
pub struct ApiKeyAuthorizer {
    key: String,
}

impl ApiKeyAuthorizer {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Authorizer for ApiKeyAuthorizer {
    fn authorize(&self, headers: &HeaderMap) -> bool {
        let ok = extract_api_key(headers).is_some_and(|k| keys_match(k, &self.key));
        if !ok {
            tracing::debug!("rejecting request without a valid API key");
        }
        ok
    }
}

fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(v) = headers.get("x-api-key").and_then(|h| h.to_str().ok()) {
        let v = v.trim();
        if !v.is_empty() {
            return Some(v);
        }
    }

    let authz = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())?;
    let token = authz.strip_prefix("Bearer ").map(str::trim)?;
    if token.is_empty() {
        return None;
    }
    Some(token)
}

/// Length-independent comparison over the whole key.
fn keys_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    let mut diff = a.len() ^ b.len();
    for (i, byte) in b.iter().enumerate() {
        diff |= usize::from(a.get(i).copied().unwrap_or(0) ^ byte);
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::ApiKeyAuthorizer;
    use axum::http::{HeaderMap, HeaderValue};
    use mcp_http_stream::Authorizer as _;

    fn headers(name: &'static str, value: &'static str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(name, HeaderValue::from_static(value));
        h
    }

    #[test]
    fn accepts_x_api_key_and_bearer() {
        let auth = ApiKeyAuthorizer::new("k1");
        assert!(auth.authorize(&headers("x-api-key", "k1")));
        assert!(auth.authorize(&headers("authorization", "Bearer k1")));
    }

    #[test]
    fn rejects_missing_wrong_or_prefixed_keys() {
        let auth = ApiKeyAuthorizer::new("k1");
        assert!(!auth.authorize(&HeaderMap::new()));
        assert!(!auth.authorize(&headers("x-api-key", "k2")));
        assert!(!auth.authorize(&headers("x-api-key", "k1k1")));
        assert!(!auth.authorize(&headers("authorization", "Basic k1")));
        assert!(!auth.authorize(&headers("authorization", "Bearer ")));
    }

    #[test]
    fn blank_x_api_key_falls_back_to_bearer() {
        let auth = ApiKeyAuthorizer::new("k1");
        let mut h = headers("x-api-key", " ");
        h.insert("authorization", HeaderValue::from_static("Bearer k1"));
        assert!(auth.authorize(&h));
    }
}
