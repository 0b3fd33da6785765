//! Transport façade: the single entry point for POST, GET, DELETE and preflight requests on
//! the MCP endpoint, plus the server-side push and lifecycle API.
//!
//! All routing state (sessions, streams, pending requests) lives behind one lock. The lock is
//! never held across an await: dispatcher calls run outside it and re-enter it to settle.

use crate::config::{LAST_EVENT_ID_HEADER, ResponseMode, TransportConfig};
use crate::correlator::{DeliveryMode, PendingRequest, RequestCorrelator};
use crate::cors::CorsHeaders;
use crate::dispatcher::{AllowAll, Authorizer, Dispatcher, RequestContext};
use crate::error::{Result, TransportError};
use crate::jsonrpc::{
    JsonRpcMessage, JsonRpcRequest, Outcome, ParsedBody, RequestId, response_value,
};
use crate::multiplexer::{
    Delivery, StreamHandle, StreamKind, StreamMultiplexer, StreamReceiver, stream_channel,
};
use crate::session::{DestroyReason, SessionId, SessionRegistry};
use crate::sse::EventStream;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse as _, Json, Response};
use axum::routing::any;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Seconds advertised in `Retry-After` when the session table is full.
const CAPACITY_RETRY_AFTER_SECS: &str = "5";

/// What a session teardown released.
#[derive(Debug, Default)]
pub struct DestroyedSession {
    pub streams: Vec<StreamHandle>,
    pub cancelled: Vec<PendingRequest>,
}

impl DestroyedSession {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty() && self.cancelled.is_empty()
    }
}

struct Core {
    registry: SessionRegistry,
    mux: StreamMultiplexer,
    correlator: RequestCorrelator,
}

impl Core {
    fn create_session(
        &mut self,
        now: Instant,
        ephemeral: bool,
    ) -> Result<(SessionId, CancellationToken)> {
        if self.registry.is_full() {
            let reclaimed = self.sweep(now);
            if reclaimed > 0 {
                tracing::debug!(reclaimed, "reclaimed expired sessions at capacity");
            }
        }
        let id = self.registry.create_session(now, ephemeral)?;
        self.mux.open_session(&id);
        let cancel = self
            .registry
            .peek(&id)
            .map(|s| s.cancel.clone())
            .unwrap_or_default();
        if !ephemeral {
            tracing::info!(mcp_session_id = %id, live = self.registry.len(), "session created");
        }
        Ok((id, cancel))
    }

    /// Remove a session everywhere. Stream-mode requests still pending get a terminal error on
    /// their stream before the streams are closed; batch waiters observe the cancel token.
    fn destroy(&mut self, id: &SessionId, reason: DestroyReason, now: Instant) -> DestroyedSession {
        if self.registry.destroy(id, reason).is_none() {
            return DestroyedSession::default();
        }

        let cancelled = self.correlator.cancel_all(id);
        let terminated = TransportError::SessionTerminated.to_error_object();
        for pending in &cancelled {
            if let DeliveryMode::Stream(stream_id) = pending.mode {
                let message = response_value(Some(&pending.id), &Err(terminated.clone()));
                let _ = self.mux.send(id, &message, Some(stream_id), now);
            }
        }
        let streams = self.mux.remove_session(id);
        DestroyedSession { streams, cancelled }
    }

    fn sweep(&mut self, now: Instant) -> usize {
        let expired = self.registry.expired(now);
        for id in &expired {
            let released = self.destroy(id, DestroyReason::Expired, now);
            tracing::info!(
                mcp_session_id = %id,
                streams = released.streams.len(),
                cancelled = released.cancelled.len(),
                "session expired"
            );
        }
        expired.len()
    }
}

pub(crate) struct Shared {
    config: TransportConfig,
    session_header: HeaderName,
    cors: CorsHeaders,
    core: Mutex<Core>,
    dispatcher: Arc<dyn Dispatcher>,
    authorizer: Arc<dyn Authorizer>,
    shutdown: CancellationToken,
}

impl Shared {
    /// Called when an SSE body is dropped, whether it ended or the client went away.
    pub(crate) fn on_stream_dropped(&self, handle: &StreamHandle) {
        let now = Instant::now();
        let mut core = self.core.lock();
        core.mux.detach(handle);
        let ephemeral = core
            .registry
            .peek(&handle.session_id)
            .is_some_and(|s| s.ephemeral);
        if ephemeral {
            core.destroy(&handle.session_id, DestroyReason::Completed, now);
        }
    }
}

/// The session the current HTTP request runs in.
struct ResolvedSession {
    id: SessionId,
    ephemeral: bool,
    cancel: CancellationToken,
}

impl ResolvedSession {
    /// Session id to echo in the response header. Ephemeral sessions are never announced.
    fn announced(&self) -> Option<&SessionId> {
        (!self.ephemeral).then_some(&self.id)
    }
}

/// Streamable HTTP transport. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
}

impl Transport {
    /// Build a transport that accepts every request.
    ///
    /// # Errors
    ///
    /// [`TransportError::Config`] if the configuration is invalid.
    pub fn new(config: TransportConfig, dispatcher: Arc<dyn Dispatcher>) -> Result<Self> {
        Self::with_authorizer(config, dispatcher, Arc::new(AllowAll))
    }

    /// Build a transport that consults `authorizer` before processing any request.
    ///
    /// # Errors
    ///
    /// [`TransportError::Config`] if the configuration is invalid.
    pub fn with_authorizer(
        config: TransportConfig,
        dispatcher: Arc<dyn Dispatcher>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Result<Self> {
        config.validate().map_err(TransportError::Config)?;
        let session_header =
            HeaderName::from_bytes(config.session.header_name.trim().as_bytes()).map_err(|e| {
                TransportError::Config(format!(
                    "invalid session header name '{}': {e}",
                    config.session.header_name
                ))
            })?;
        let cors = CorsHeaders::from_config(&config.cors, &config.session.header_name)?;
        let core = Core {
            registry: SessionRegistry::new(
                config.session.max_concurrent_sessions,
                config.session.session_timeout(),
            ),
            mux: StreamMultiplexer::new(&config.stream),
            correlator: RequestCorrelator::new(),
        };

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                session_header,
                cors,
                core: Mutex::new(core),
                dispatcher,
                authorizer,
                shutdown: CancellationToken::new(),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.shared.core.lock().registry.len()
    }

    #[must_use]
    pub fn has_session(&self, id: &SessionId) -> bool {
        self.shared.core.lock().registry.contains(id)
    }

    /// Cancelled by [`Transport::shutdown`].
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    /// Route one HTTP request on the MCP endpoint by method.
    pub async fn handle(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        match parts.method {
            Method::POST => match self.read_body(&parts.headers, body).await {
                Ok(bytes) => self.handle_post(&parts.headers, bytes).await,
                Err(e) => self.reject(None, &e),
            },
            Method::GET => self.handle_get(&parts.headers),
            Method::DELETE => self.handle_delete(&parts.headers),
            Method::OPTIONS => self.preflight(),
            other => self.reject(None, &TransportError::MethodNotAllowed(other.to_string())),
        }
    }

    async fn read_body(&self, headers: &HeaderMap, body: Body) -> Result<Bytes> {
        let limit = self.shared.config.max_message_size;
        let declared = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<usize>().ok());
        if declared.is_some_and(|n| n > limit) {
            return Err(TransportError::MessageTooLarge { limit });
        }
        axum::body::to_bytes(body, limit).await.map_err(|e| {
            tracing::debug!(error = %e, limit, "failed to read request body");
            TransportError::MessageTooLarge { limit }
        })
    }

    /// Handle a POST carrying one JSON-RPC message or an array of them.
    pub async fn handle_post(&self, headers: &HeaderMap, body: Bytes) -> Response {
        let limit = self.shared.config.max_message_size;
        if body.len() > limit {
            return self.reject(None, &TransportError::MessageTooLarge { limit });
        }
        if !self.shared.authorizer.authorize(headers) {
            return self.reject(None, &TransportError::Unauthorized);
        }
        let parsed = match ParsedBody::parse(&body) {
            Ok(parsed) => parsed,
            Err(e) => return self.reject(None, &TransportError::Parse(e)),
        };
        let session = match self.resolve_session(headers, true) {
            Ok(session) => session,
            Err(e) => return self.reject(None, &e),
        };

        let ctx = RequestContext::new(session.id.clone(), self.clone());
        let is_batch = parsed.is_batch;
        let mut requests = Vec::new();
        let mut errors = Vec::new();
        for entry in parsed.entries {
            match entry {
                Ok(JsonRpcMessage::Request(request)) => requests.push(request),
                Ok(JsonRpcMessage::Notification(notification)) => {
                    self.shared
                        .dispatcher
                        .handle_notification(ctx.clone(), notification)
                        .await;
                }
                Ok(JsonRpcMessage::Response(response)) => {
                    self.shared
                        .dispatcher
                        .handle_response(ctx.clone(), response)
                        .await;
                }
                Err(invalid) => {
                    tracing::debug!(
                        mcp_session_id = %session.id,
                        reason = %invalid.reason,
                        "invalid JSON-RPC message"
                    );
                    errors.push(response_value(
                        invalid.id.as_ref(),
                        &Err(invalid.to_error_object()),
                    ));
                }
            }
        }

        if requests.is_empty() {
            self.finish_ephemeral(&session);
            let response = if errors.is_empty() {
                StatusCode::ACCEPTED.into_response()
            } else {
                (StatusCode::BAD_REQUEST, Json(collect(errors, is_batch))).into_response()
            };
            return self.finish(response, session.announced());
        }

        match self.shared.config.response_mode {
            ResponseMode::Batch => self.answer_inline(session, requests, errors, is_batch).await,
            ResponseMode::Stream => self.open_request_stream(session, requests, errors),
        }
    }

    async fn answer_inline(
        &self,
        session: ResolvedSession,
        requests: Vec<JsonRpcRequest>,
        mut responses: Vec<Value>,
        is_batch: bool,
    ) -> Response {
        let now = Instant::now();
        let mut accepted = Vec::with_capacity(requests.len());
        {
            let mut core = self.shared.core.lock();
            // Teardown may have run while notifications earlier in the body were dispatched.
            let live = core.registry.contains(&session.id);
            for request in requests {
                let registered = if live {
                    core.correlator
                        .register(&session.id, request.id.clone(), DeliveryMode::Batch, now)
                } else {
                    Err(TransportError::SessionTerminated)
                };
                match registered {
                    Ok(()) => accepted.push(request),
                    Err(e) => {
                        tracing::warn!(mcp_session_id = %session.id, error = %e, "rejecting request");
                        responses
                            .push(response_value(Some(&request.id), &Err(e.to_error_object())));
                    }
                }
            }
        }

        let settled = futures::future::join_all(
            accepted
                .into_iter()
                .map(|request| self.settle_inline(&session, request)),
        )
        .await;
        responses.extend(settled);

        self.finish_ephemeral(&session);
        let response = (StatusCode::OK, Json(collect(responses, is_batch))).into_response();
        self.finish(response, session.announced())
    }

    /// Run one batch-mode request to its single terminal outcome.
    async fn settle_inline(&self, session: &ResolvedSession, request: JsonRpcRequest) -> Value {
        let id = request.id.clone();
        let ctx = RequestContext::new(session.id.clone(), self.clone());
        let call = tokio::time::timeout(
            self.shared.config.batch_timeout(),
            self.shared.dispatcher.handle_request(ctx, request),
        );

        let finished = tokio::select! {
            biased;
            () = session.cancel.cancelled() => None,
            result = call => Some(result),
        };

        let outcome: Outcome = match finished {
            // Teardown already settled the request through `cancel_all`.
            None => Err(TransportError::SessionTerminated.to_error_object()),
            Some(result) => {
                let settled = self.shared.core.lock().correlator.resolve(&session.id, &id);
                match (settled, result) {
                    (Ok(_), Ok(outcome)) => outcome,
                    (Ok(_), Err(_elapsed)) => {
                        tracing::warn!(
                            mcp_session_id = %session.id,
                            request_id = %id,
                            timeout_ms = self.shared.config.batch_timeout_ms,
                            "request timed out"
                        );
                        Err(TransportError::Timeout(self.shared.config.batch_timeout_ms)
                            .to_error_object())
                    }
                    (Err(e), _) => {
                        tracing::warn!(error = %e, "request settled elsewhere");
                        Err(TransportError::SessionTerminated.to_error_object())
                    }
                }
            }
        };
        response_value(Some(&id), &outcome)
    }

    /// Stream mode: the POST response itself becomes an SSE stream that carries the answers to
    /// this POST's requests and closes after the last one.
    fn open_request_stream(
        &self,
        session: ResolvedSession,
        requests: Vec<JsonRpcRequest>,
        errors: Vec<Value>,
    ) -> Response {
        let now = Instant::now();
        let (tx, rx) = stream_channel();
        let mut accepted = Vec::with_capacity(requests.len());

        let attached = {
            let mut core = self.shared.core.lock();
            match core
                .mux
                .attach(&session.id, StreamKind::Request, tx, None, now)
            {
                Ok(handle) => {
                    for error in &errors {
                        let _ = core.mux.send(&session.id, error, Some(handle.stream_id), now);
                    }
                    for request in requests {
                        let registered = core.correlator.register(
                            &session.id,
                            request.id.clone(),
                            DeliveryMode::Stream(handle.stream_id),
                            now,
                        );
                        match registered {
                            Ok(()) => accepted.push(request),
                            Err(e) => {
                                tracing::warn!(mcp_session_id = %session.id, error = %e, "rejecting request");
                                let message =
                                    response_value(Some(&request.id), &Err(e.to_error_object()));
                                let _ = core.mux.send(
                                    &session.id,
                                    &message,
                                    Some(handle.stream_id),
                                    now,
                                );
                            }
                        }
                    }
                    if accepted.is_empty() {
                        core.mux.close(&handle);
                    }
                    Ok(handle)
                }
                Err(e) => Err(e),
            }
        };
        let handle = match attached {
            Ok(handle) => handle,
            Err(e) => return self.reject(None, &e),
        };

        for request in accepted {
            self.spawn_stream_request(&session, request);
        }
        self.finish(self.sse_response(rx, handle), session.announced())
    }

    fn spawn_stream_request(&self, session: &ResolvedSession, request: JsonRpcRequest) {
        let transport = self.clone();
        let session_id = session.id.clone();
        let cancel = session.cancel.clone();
        tokio::spawn(async move {
            let id = request.id.clone();
            let ctx = RequestContext::new(session_id.clone(), transport.clone());
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!(
                        mcp_session_id = %session_id,
                        request_id = %id,
                        "dispatch cancelled by session teardown"
                    );
                    return;
                }
                outcome = transport.shared.dispatcher.handle_request(ctx, request) => outcome,
            };
            transport.complete_stream_request(&session_id, &id, &outcome);
        });
    }

    fn complete_stream_request(&self, session_id: &SessionId, id: &RequestId, outcome: &Outcome) {
        let now = Instant::now();
        let mut core = self.shared.core.lock();
        let pending = match core.correlator.resolve(session_id, id) {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(error = %e, "dropping response for a settled request");
                return;
            }
        };
        let DeliveryMode::Stream(stream_id) = pending.mode else {
            tracing::warn!(mcp_session_id = %session_id, request_id = %id, "unexpected inline request");
            return;
        };

        let message = response_value(Some(id), outcome);
        match core.mux.send(session_id, &message, Some(stream_id), now) {
            Ok(Delivery::Buffered { event_id }) => tracing::debug!(
                mcp_session_id = %session_id,
                request_id = %id,
                event_id,
                "no open stream; response buffered"
            ),
            Ok(Delivery::Written { .. }) => {}
            Err(e) => tracing::warn!(mcp_session_id = %session_id, error = %e, "response not delivered"),
        }

        if core.correlator.outstanding_on(session_id, stream_id) == 0 {
            core.mux.close(&StreamHandle {
                session_id: session_id.clone(),
                stream_id,
                kind: StreamKind::Request,
            });
        }
    }

    /// Open a standalone SSE stream for server-initiated messages, optionally resuming after
    /// `Last-Event-ID`.
    pub fn handle_get(&self, headers: &HeaderMap) -> Response {
        if !self.shared.authorizer.authorize(headers) {
            return self.reject(None, &TransportError::Unauthorized);
        }
        let cfg = &self.shared.config;
        if cfg.response_mode == ResponseMode::Batch || !cfg.session.enabled {
            return self.reject(
                None,
                &TransportError::MethodNotAllowed(
                    "GET requires stream mode with session management".to_string(),
                ),
            );
        }
        let session = match self.resolve_session(headers, false) {
            Ok(session) => session,
            Err(e) => return self.reject(None, &e),
        };

        let last_event_id = headers
            .get(LAST_EVENT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let (tx, rx) = stream_channel();
        let attached = self.shared.core.lock().mux.attach(
            &session.id,
            StreamKind::Standalone,
            tx,
            last_event_id,
            Instant::now(),
        );
        let handle = match attached {
            Ok(handle) => handle,
            Err(e) => return self.reject(None, &e),
        };

        tracing::debug!(
            mcp_session_id = %session.id,
            stream_id = handle.stream_id,
            last_event_id = ?last_event_id,
            "standalone stream opened"
        );
        self.finish(self.sse_response(rx, handle), Some(&session.id))
    }

    /// Client-initiated session termination.
    pub fn handle_delete(&self, headers: &HeaderMap) -> Response {
        if !self.shared.authorizer.authorize(headers) {
            return self.reject(None, &TransportError::Unauthorized);
        }
        let cfg = &self.shared.config;
        if !cfg.session.enabled {
            return self.reject(
                None,
                &TransportError::MethodNotAllowed(
                    "DELETE requires session management".to_string(),
                ),
            );
        }
        let session_id = self.session_id_from(headers);
        if !cfg.session.allow_client_termination {
            return self.reject(
                session_id.as_ref(),
                &TransportError::Forbidden("client session termination is disabled"),
            );
        }
        let Some(id) = session_id else {
            return self.reject(
                None,
                &TransportError::MissingSessionId(cfg.session.header_name.clone()),
            );
        };

        let released = {
            let mut core = self.shared.core.lock();
            core.registry
                .contains(&id)
                .then(|| core.destroy(&id, DestroyReason::ClientTerminated, Instant::now()))
        };
        match released {
            None => self.reject(None, &TransportError::SessionNotFound(id.to_string())),
            Some(released) => {
                tracing::info!(
                    mcp_session_id = %id,
                    streams = released.streams.len(),
                    cancelled = released.cancelled.len(),
                    "session terminated by client"
                );
                self.finish(StatusCode::OK.into_response(), None)
            }
        }
    }

    fn preflight(&self) -> Response {
        self.finish(StatusCode::NO_CONTENT.into_response(), None)
    }

    /// Push a server-initiated message to a session: its newest standalone stream if one is
    /// open, else the session's pending-outbound queue.
    ///
    /// # Errors
    ///
    /// [`TransportError::Forbidden`] in batch mode, [`TransportError::SessionNotFound`] if the
    /// session is gone.
    pub fn send_to_session(
        &self,
        session_id: &SessionId,
        message: &JsonRpcMessage,
    ) -> Result<Delivery> {
        if self.shared.config.response_mode == ResponseMode::Batch {
            return Err(TransportError::Forbidden(
                "server push requires stream response mode",
            ));
        }
        let mut core = self.shared.core.lock();
        if !core.registry.contains(session_id) {
            return Err(TransportError::SessionNotFound(session_id.to_string()));
        }
        core.mux
            .send(session_id, &message.to_value(), None, Instant::now())
    }

    /// Push a message to every live session. Returns how many accepted it.
    pub fn broadcast(&self, message: &JsonRpcMessage) -> usize {
        if self.shared.config.response_mode == ResponseMode::Batch {
            return 0;
        }
        let value = message.to_value();
        let now = Instant::now();
        let mut core = self.shared.core.lock();
        let ids = core.registry.ids();
        ids.iter()
            .filter(|id| core.mux.send(id, &value, None, now).is_ok())
            .count()
    }

    /// Tear a session down. Idempotent: a second call releases nothing.
    pub fn destroy_session(&self, id: &SessionId, reason: DestroyReason) -> DestroyedSession {
        self.shared.core.lock().destroy(id, reason, Instant::now())
    }

    /// Destroy every expired session. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.shared.core.lock().sweep(Instant::now())
    }

    /// Run [`Transport::sweep_expired`] periodically until shutdown.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let transport = self.clone();
        let period = self.shared.config.session.sweep_interval();
        let shutdown = self.shared.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = transport.sweep_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "expired sessions swept");
                        }
                    }
                }
            }
            tracing::debug!("session sweeper stopped");
        })
    }

    /// Stop the sweeper and destroy every session, closing all streams.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let now = Instant::now();
        let mut core = self.shared.core.lock();
        let ids = core.registry.ids();
        for id in &ids {
            core.destroy(id, DestroyReason::Shutdown, now);
        }
        tracing::info!(sessions = ids.len(), "transport shut down");
    }

    fn resolve_session(&self, headers: &HeaderMap, create: bool) -> Result<ResolvedSession> {
        let now = Instant::now();
        let mut core = self.shared.core.lock();

        if !self.shared.config.session.enabled {
            let (id, cancel) = core.create_session(now, true)?;
            return Ok(ResolvedSession {
                id,
                ephemeral: true,
                cancel,
            });
        }

        let Some(id) = self.session_id_from(headers) else {
            if !create {
                return Err(TransportError::MissingSessionId(
                    self.shared.config.session.header_name.clone(),
                ));
            }
            let (id, cancel) = core.create_session(now, false)?;
            return Ok(ResolvedSession {
                id,
                ephemeral: false,
                cancel,
            });
        };

        let lookup = core.registry.get(&id, now).map(|s| s.cancel.clone());
        match lookup {
            Ok(cancel) => {
                core.registry.touch(&id, now);
                Ok(ResolvedSession {
                    id,
                    ephemeral: false,
                    cancel,
                })
            }
            Err(TransportError::SessionExpired(s)) => {
                core.destroy(&id, DestroyReason::Expired, now);
                tracing::info!(mcp_session_id = %id, "session expired on access");
                Err(TransportError::SessionExpired(s))
            }
            Err(e) => Err(e),
        }
    }

    fn session_id_from(&self, headers: &HeaderMap) -> Option<SessionId> {
        headers
            .get(&self.shared.session_header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(SessionId::from)
    }

    fn finish_ephemeral(&self, session: &ResolvedSession) {
        if session.ephemeral {
            self.destroy_session(&session.id, DestroyReason::Completed);
        }
    }

    fn sse_response(&self, rx: StreamReceiver, handle: StreamHandle) -> Response {
        let stream = EventStream::new(rx, Arc::downgrade(&self.shared), handle);
        let interval = Duration::from_secs(self.shared.config.stream.keep_alive_secs.max(1));
        Sse::new(stream)
            .keep_alive(KeepAlive::new().interval(interval))
            .into_response()
    }

    /// Transport-level failure: HTTP status plus a JSON-RPC error body with `id: null`.
    fn reject(&self, session: Option<&SessionId>, err: &TransportError) -> Response {
        let status = err.status();
        if status.is_server_error() {
            tracing::warn!(error = %err, status = status.as_u16(), "request rejected");
        } else {
            tracing::debug!(error = %err, status = status.as_u16(), "request rejected");
        }

        let body = response_value(None, &Err(err.to_error_object()));
        let mut response = (status, Json(body)).into_response();
        if matches!(err, TransportError::CapacityExceeded { .. }) {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(CAPACITY_RETRY_AFTER_SECS),
            );
        }
        self.finish(response, session)
    }

    fn finish(&self, mut response: Response, session: Option<&SessionId>) -> Response {
        let headers = response.headers_mut();
        self.shared.cors.apply(headers);
        if let Some(id) = session
            && let Ok(value) = HeaderValue::from_str(id.as_str())
        {
            headers.insert(self.shared.session_header.clone(), value);
        }
        response
    }
}

fn collect(mut values: Vec<Value>, is_batch: bool) -> Value {
    if is_batch {
        Value::Array(values)
    } else if values.is_empty() {
        Value::Null
    } else {
        values.swap_remove(0)
    }
}

/// Mount the transport on its configured endpoint.
pub fn router(transport: Transport) -> Router {
    let endpoint = transport.config().endpoint.clone();
    Router::new()
        .route(&endpoint, any(serve))
        .with_state(transport)
}

async fn serve(State(transport): State<Transport>, request: Request) -> Response {
    transport.handle(request).await
}
