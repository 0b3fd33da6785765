//! Minimal JSON-RPC 2.0 message model used by the transport.
//!
//! The transport only needs to tell requests, notifications and responses apart, correlate
//! request ids and serialize results. Method semantics live in the [`Dispatcher`].
//!
//! [`Dispatcher`]: crate::dispatcher::Dispatcher

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;

pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC request id. Uniqueness is scoped to a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::String(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// JSON-RPC error code.
///
/// Standard codes plus the transport's server-defined codes (`-32000..=-32099`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    pub const PARSE_ERROR: Self = Self(-32700);
    pub const INVALID_REQUEST: Self = Self(-32600);
    pub const METHOD_NOT_FOUND: Self = Self(-32601);
    pub const INVALID_PARAMS: Self = Self(-32602);
    pub const INTERNAL_ERROR: Self = Self(-32603);

    pub const REQUEST_TIMEOUT: Self = Self(-32001);
    pub const SESSION_TERMINATED: Self = Self(-32002);
    pub const FORBIDDEN: Self = Self(-32003);
    pub const CAPACITY_EXCEEDED: Self = Self(-32004);
    pub const SESSION_NOT_FOUND: Self = Self(-32005);
    pub const MESSAGE_TOO_LARGE: Self = Self(-32006);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorCode::METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INVALID_PARAMS, message)
    }
}

/// Terminal outcome of a request: a result value or an error object.
pub type Outcome = std::result::Result<Value, ErrorObject>;

#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcRequest {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcNotification {
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcResponse {
    pub id: RequestId,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

/// A body member that is valid JSON but not a valid JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidMessage {
    /// The id, when one could still be extracted (so the error can be correlated).
    pub id: Option<RequestId>,
    pub reason: String,
}

impl InvalidMessage {
    fn new(id: Option<RequestId>, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject::new(ErrorCode::INVALID_REQUEST, self.reason.clone())
    }
}

impl JsonRpcMessage {
    #[must_use]
    pub fn request(id: impl Into<RequestId>, method: &str, params: Option<Value>) -> Self {
        Self::Request(JsonRpcRequest {
            id: id.into(),
            method: method.to_string(),
            params,
        })
    }

    #[must_use]
    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self::Notification(JsonRpcNotification {
            method: method.to_string(),
            params,
        })
    }

    #[must_use]
    pub fn response(id: RequestId, outcome: Outcome) -> Self {
        Self::Response(JsonRpcResponse { id, outcome })
    }

    /// Classify one decoded JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidMessage`] when the value is not a JSON-RPC 2.0 object.
    pub fn from_value(value: Value) -> std::result::Result<Self, InvalidMessage> {
        let Value::Object(mut obj) = value else {
            return Err(InvalidMessage::new(None, "message must be a JSON object"));
        };

        let id = match obj.remove("id") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                RequestId::from_value(&v)
                    .ok_or_else(|| InvalidMessage::new(None, "id must be a string or integer"))?,
            ),
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(InvalidMessage::new(id, "jsonrpc must be \"2.0\""));
        }

        if let Some(method) = obj.remove("method") {
            let Value::String(method) = method else {
                return Err(InvalidMessage::new(id, "method must be a string"));
            };
            let params = obj.remove("params");
            return Ok(match id {
                Some(id) => Self::Request(JsonRpcRequest { id, method, params }),
                None => Self::Notification(JsonRpcNotification { method, params }),
            });
        }

        let Some(id) = id else {
            return Err(InvalidMessage::new(None, "response without id"));
        };
        if let Some(result) = obj.remove("result") {
            return Ok(Self::response(id, Ok(result)));
        }
        match obj.remove("error").map(serde_json::from_value::<ErrorObject>) {
            Some(Ok(err)) => Ok(Self::response(id, Err(err))),
            Some(Err(e)) => Err(InvalidMessage::new(Some(id), format!("invalid error: {e}"))),
            None => Err(InvalidMessage::new(
                Some(id),
                "message has neither method, result nor error",
            )),
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Request(r) => {
                let mut obj = envelope();
                obj.insert("id".into(), r.id.to_value());
                obj.insert("method".into(), Value::from(r.method.as_str()));
                if let Some(p) = &r.params {
                    obj.insert("params".into(), p.clone());
                }
                Value::Object(obj)
            }
            Self::Notification(n) => {
                let mut obj = envelope();
                obj.insert("method".into(), Value::from(n.method.as_str()));
                if let Some(p) = &n.params {
                    obj.insert("params".into(), p.clone());
                }
                Value::Object(obj)
            }
            Self::Response(r) => response_value(Some(&r.id), &r.outcome),
        }
    }
}

fn envelope() -> Map<String, Value> {
    let mut obj = Map::new();
    obj.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
    obj
}

/// Serialize a response. `id: None` produces `"id": null` (errors without a correlatable id).
#[must_use]
pub fn response_value(id: Option<&RequestId>, outcome: &Outcome) -> Value {
    let id = id.map_or(Value::Null, RequestId::to_value);
    match outcome {
        Ok(result) => json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result }),
        Err(error) => json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "error": error }),
    }
}

/// A decoded POST body: one message or a JSON array of messages.
#[derive(Debug, Clone)]
pub struct ParsedBody {
    /// Whether the body was an array (responses are then returned as an array too).
    pub is_batch: bool,
    pub entries: Vec<std::result::Result<JsonRpcMessage, InvalidMessage>>,
}

impl ParsedBody {
    /// Decode a POST body.
    ///
    /// # Errors
    ///
    /// Returns a parse error string if the body is not JSON or is an empty array.
    pub fn parse(bytes: &[u8]) -> std::result::Result<Self, String> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        match value {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err("empty batch".to_string());
                }
                Ok(Self {
                    is_batch: true,
                    entries: items.into_iter().map(JsonRpcMessage::from_value).collect(),
                })
            }
            other => Ok(Self {
                is_batch: false,
                entries: vec![JsonRpcMessage::from_value(other)],
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorCode, JsonRpcMessage, ParsedBody, RequestId, response_value};
    use serde_json::json;

    #[test]
    fn classifies_request_notification_and_response() {
        let req = JsonRpcMessage::from_value(json!({"jsonrpc":"2.0","id":1,"method":"ping"}))
            .expect("request");
        assert!(matches!(req, JsonRpcMessage::Request(ref r) if r.id == RequestId::Number(1)));

        let note =
            JsonRpcMessage::from_value(json!({"jsonrpc":"2.0","method":"notifications/x"}))
                .expect("notification");
        assert!(matches!(note, JsonRpcMessage::Notification(_)));

        let resp = JsonRpcMessage::from_value(json!({"jsonrpc":"2.0","id":"a","result":{}}))
            .expect("response");
        assert!(matches!(resp, JsonRpcMessage::Response(ref r) if r.outcome.is_ok()));

        let err = JsonRpcMessage::from_value(
            json!({"jsonrpc":"2.0","id":"a","error":{"code":-32601,"message":"nope"}}),
        )
        .expect("error response");
        let JsonRpcMessage::Response(r) = err else {
            panic!("expected response");
        };
        assert_eq!(r.outcome.unwrap_err().code, ErrorCode::METHOD_NOT_FOUND);
    }

    #[test]
    fn rejects_wrong_version_but_keeps_id() {
        let err = JsonRpcMessage::from_value(json!({"jsonrpc":"1.0","id":5,"method":"x"}))
            .expect_err("invalid");
        assert_eq!(err.id, Some(RequestId::Number(5)));
    }

    #[test]
    fn request_serializes_with_envelope() {
        let v = JsonRpcMessage::request(3, "echo", Some(json!({"a":1}))).to_value();
        assert_eq!(
            v,
            json!({"jsonrpc":"2.0","id":3,"method":"echo","params":{"a":1}})
        );
    }

    #[test]
    fn response_without_id_is_null() {
        let v = response_value(None, &Ok(json!("x")));
        assert_eq!(v["id"], serde_json::Value::Null);
        assert_eq!(v["result"], json!("x"));
    }

    #[test]
    fn parses_arrays_and_rejects_empty_batch() {
        let body = br#"[{"jsonrpc":"2.0","id":1,"method":"a"},{"jsonrpc":"2.0","method":"b"},42]"#;
        let parsed = ParsedBody::parse(body).expect("parse");
        assert!(parsed.is_batch);
        assert_eq!(parsed.entries.len(), 3);
        assert!(matches!(parsed.entries[0], Ok(JsonRpcMessage::Request(_))));
        assert!(matches!(parsed.entries[1], Ok(JsonRpcMessage::Notification(_))));
        assert!(parsed.entries[2].is_err());

        assert!(ParsedBody::parse(b"[]").is_err());
        assert!(ParsedBody::parse(b"{not json").is_err());
    }
}
