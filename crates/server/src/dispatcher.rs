use async_trait::async_trait;
use mcp_http_stream::jsonrpc::{JsonRpcNotification, JsonRpcResponse};
use mcp_http_stream::{
    Delivery, Dispatcher, ErrorCode, ErrorObject, JsonRpcRequest, Outcome, RequestContext,
};
use serde_json::{Value, json};
use std::time::Duration;

const PROTOCOL_VERSION: &str = "2025-03-26";
/// Upper bound for the `sleep` method.
const MAX_SLEEP_MS: u64 = 600_000;

/// Built-in methods for exercising the transport end to end:
/// `initialize`, `ping`, `echo`, `sleep` and `notify`.
pub struct BuiltinDispatcher {
    server_name: String,
}

impl BuiltinDispatcher {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
        }
    }

    fn initialize(&self, params: Option<&Value>) -> Value {
        let protocol_version = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION);
        json!({
            "protocolVersion": protocol_version,
            "capabilities": { "logging": {} },
            "serverInfo": {
                "name": self.server_name,
                "version": env!("CARGO_PKG_VERSION"),
            }
        })
    }
}

#[async_trait]
impl Dispatcher for BuiltinDispatcher {
    async fn handle_request(&self, ctx: RequestContext, request: JsonRpcRequest) -> Outcome {
        let params = request.params.as_ref();
        match request.method.as_str() {
            "initialize" => Ok(self.initialize(params)),
            "ping" => Ok(json!("pong")),
            "echo" => Ok(params.cloned().unwrap_or(Value::Null)),
            "sleep" => {
                let ms = params
                    .and_then(|p| p.get("ms"))
                    .and_then(Value::as_u64)
                    .ok_or_else(|| ErrorObject::invalid_params("sleep requires params.ms"))?;
                if ms > MAX_SLEEP_MS {
                    return Err(ErrorObject::invalid_params(format!(
                        "params.ms must be <= {MAX_SLEEP_MS}"
                    )));
                }
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!({ "sleptMs": ms }))
            }
            "notify" => {
                let method = params
                    .and_then(|p| p.get("method"))
                    .and_then(Value::as_str)
                    .unwrap_or("notifications/message");
                let payload = params.and_then(|p| p.get("params")).cloned();
                match ctx.notify(method, payload) {
                    Ok(Delivery::Written { event_id, .. }) => {
                        Ok(json!({ "delivered": "written", "eventId": event_id }))
                    }
                    Ok(Delivery::Buffered { event_id }) => {
                        Ok(json!({ "delivered": "buffered", "eventId": event_id }))
                    }
                    Err(e) => Err(ErrorObject::new(ErrorCode::INTERNAL_ERROR, e.to_string())),
                }
            }
            other => Err(ErrorObject::method_not_found(other)),
        }
    }

    async fn handle_notification(&self, ctx: RequestContext, notification: JsonRpcNotification) {
        tracing::debug!(
            mcp_session_id = %ctx.session_id(),
            method = %notification.method,
            "client notification"
        );
    }

    async fn handle_response(&self, ctx: RequestContext, response: JsonRpcResponse) {
        tracing::debug!(
            mcp_session_id = %ctx.session_id(),
            request_id = %response.id,
            ok = response.outcome.is_ok(),
            "client response"
        );
    }
}
