//! Request correlator: pairs pending request ids with their delivery mode and guarantees a
//! single terminal settlement per request.
//!
//! Settlement is "remove from the table": whoever removes the entry first (dispatcher
//! completion, batch timeout or session teardown) owns the outcome, every later attempt gets
//! [`TransportError::UnknownRequest`].

use crate::error::{Result, TransportError};
use crate::jsonrpc::RequestId;
use crate::multiplexer::StreamId;
use crate::session::SessionId;
use std::collections::HashMap;
use tokio::time::Instant;

/// How the response to a pending request is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Written inline into the originating HTTP response.
    Batch,
    /// Pushed as an SSE event, preferably on the given request-bound stream.
    Stream(StreamId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub session_id: SessionId,
    pub id: RequestId,
    pub issued_at: Instant,
    pub mode: DeliveryMode,
}

#[derive(Default)]
pub struct RequestCorrelator {
    pending: HashMap<SessionId, HashMap<RequestId, PendingRequest>>,
}

impl RequestCorrelator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending request.
    ///
    /// # Errors
    ///
    /// [`TransportError::DuplicateRequestId`] if `(session, id)` is already pending.
    pub fn register(
        &mut self,
        session_id: &SessionId,
        id: RequestId,
        mode: DeliveryMode,
        now: Instant,
    ) -> Result<()> {
        let per_session = self.pending.entry(session_id.clone()).or_default();
        if per_session.contains_key(&id) {
            return Err(TransportError::DuplicateRequestId(id));
        }
        per_session.insert(
            id.clone(),
            PendingRequest {
                session_id: session_id.clone(),
                id,
                issued_at: now,
                mode,
            },
        );
        Ok(())
    }

    /// Settle a pending request and hand back its registration.
    ///
    /// # Errors
    ///
    /// [`TransportError::UnknownRequest`] if the request was already settled (or never
    /// registered). Callers log this; it is never surfaced to the client.
    pub fn resolve(&mut self, session_id: &SessionId, id: &RequestId) -> Result<PendingRequest> {
        let unknown = || TransportError::UnknownRequest {
            session_id: session_id.to_string(),
            request_id: id.clone(),
        };
        let per_session = self.pending.get_mut(session_id).ok_or_else(unknown)?;
        let pending = per_session.remove(id).ok_or_else(unknown)?;
        if per_session.is_empty() {
            self.pending.remove(session_id);
        }
        Ok(pending)
    }

    /// Settle every pending request of a session (teardown). Oldest first.
    pub fn cancel_all(&mut self, session_id: &SessionId) -> Vec<PendingRequest> {
        let mut cancelled: Vec<PendingRequest> = self
            .pending
            .remove(session_id)
            .map(|m| m.into_values().collect())
            .unwrap_or_default();
        cancelled.sort_by_key(|p| p.issued_at);
        cancelled
    }

    /// Number of requests still waiting to be answered on a request-bound stream.
    #[must_use]
    pub fn outstanding_on(&self, session_id: &SessionId, stream_id: StreamId) -> usize {
        self.pending.get(session_id).map_or(0, |m| {
            m.values()
                .filter(|p| p.mode == DeliveryMode::Stream(stream_id))
                .count()
        })
    }

    #[must_use]
    pub fn pending_count(&self, session_id: &SessionId) -> usize {
        self.pending.get(session_id).map_or(0, HashMap::len)
    }
}
