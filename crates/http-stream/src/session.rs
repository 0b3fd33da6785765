//! Session registry: live sessions, id generation, capacity and expiry.
//!
//! The registry is plain data. It is only mutated under the transport's state lock, so none
//! of its methods block or await.

use crate::error::{Result, TransportError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Opaque session token, exposed to clients through the session header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string().into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// Client DELETE.
    ClientTerminated,
    /// Idle longer than the session timeout.
    Expired,
    /// Transport shutdown.
    Shutdown,
    /// A stateless exchange finished.
    Completed,
}

impl DestroyReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DestroyReason::ClientTerminated => "client_terminated",
            DestroyReason::Expired => "expired",
            DestroyReason::Shutdown => "shutdown",
            DestroyReason::Completed => "completed",
        }
    }
}

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub created_at: Instant,
    pub last_activity_at: Instant,
    /// Created while session management is disabled; never announced to the client.
    pub ephemeral: bool,
    /// Fired when the session is destroyed; in-flight dispatcher calls select on it.
    pub cancel: CancellationToken,
}

impl Session {
    fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity_at) > timeout
    }
}

pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    max_sessions: usize,
    timeout: Duration,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(max_sessions: usize, timeout: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            max_sessions,
            timeout,
        }
    }

    /// Create a session.
    ///
    /// # Errors
    ///
    /// [`TransportError::CapacityExceeded`] when the live count has reached the limit.
    /// Existing sessions are never evicted to make room.
    pub fn create_session(&mut self, now: Instant, ephemeral: bool) -> Result<SessionId> {
        if self.is_full() {
            return Err(TransportError::CapacityExceeded {
                limit: self.max_sessions,
            });
        }

        let mut id = SessionId::generate();
        while self.sessions.contains_key(&id) {
            id = SessionId::generate();
        }

        self.sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                created_at: now,
                last_activity_at: now,
                ephemeral,
                cancel: CancellationToken::new(),
            },
        );
        Ok(id)
    }

    /// Look up a live session.
    ///
    /// # Errors
    ///
    /// [`TransportError::SessionNotFound`] if unknown, [`TransportError::SessionExpired`] if
    /// it is still registered but past its timeout (the sweeper has not reached it yet).
    pub fn get(&self, id: &SessionId, now: Instant) -> Result<&Session> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| TransportError::SessionNotFound(id.to_string()))?;
        if session.is_expired(now, self.timeout) {
            return Err(TransportError::SessionExpired(id.to_string()));
        }
        Ok(session)
    }

    /// Look up a session without the expiry check.
    #[must_use]
    pub fn peek(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Refresh `last_activity_at`. A missing session is not an error: expiry races are
    /// expected and the caller treats absence as "expired".
    pub fn touch(&mut self, id: &SessionId, now: Instant) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.last_activity_at = now;
        }
    }

    /// Remove a session and fire its cancellation token. Idempotent.
    pub fn destroy(&mut self, id: &SessionId, reason: DestroyReason) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        session.cancel.cancel();
        tracing::debug!(
            mcp_session_id = %id,
            reason = reason.as_str(),
            age_ms = session.created_at.elapsed().as_millis() as u64,
            "session destroyed"
        );
        Some(session)
    }

    /// Ids of sessions idle for longer than the timeout.
    #[must_use]
    pub fn expired(&self, now: Instant) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.is_expired(now, self.timeout))
            .map(|s| s.id.clone())
            .collect()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_sessions
    }
}
