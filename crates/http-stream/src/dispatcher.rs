//! Collaborator seams: method dispatch and request authorization.

use crate::error::Result;
use crate::jsonrpc::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Outcome,
};
use crate::multiplexer::Delivery;
use crate::session::SessionId;
use crate::transport::Transport;
use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::Value;

/// Per-message context handed to the dispatcher.
#[derive(Clone)]
pub struct RequestContext {
    session_id: SessionId,
    transport: Transport,
}

impl RequestContext {
    pub(crate) fn new(session_id: SessionId, transport: Transport) -> Self {
        Self {
            session_id,
            transport,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Push a server-initiated notification to this session.
    ///
    /// # Errors
    ///
    /// Fails if the session is gone or the transport runs in batch mode.
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<Delivery> {
        self.transport
            .send_to_session(&self.session_id, &JsonRpcMessage::notification(method, params))
    }
}

/// Answers JSON-RPC requests. Implemented by the application.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    /// Produce the terminal outcome for one request. May suspend arbitrarily long; the
    /// transport applies the batch timeout and cancels the call when the session dies.
    async fn handle_request(&self, ctx: RequestContext, request: JsonRpcRequest) -> Outcome;

    /// Fire-and-forget client notifications.
    async fn handle_notification(&self, _ctx: RequestContext, _notification: JsonRpcNotification) {
    }

    /// Client replies to server-initiated requests.
    async fn handle_response(&self, _ctx: RequestContext, _response: JsonRpcResponse) {}
}

/// Decides whether an incoming HTTP request may be processed at all.
pub trait Authorizer: Send + Sync + 'static {
    fn authorize(&self, headers: &HeaderMap) -> bool;
}

/// Accepts everything (no authentication configured).
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _headers: &HeaderMap) -> bool {
        true
    }
}
