//! Stream multiplexer: per-session SSE streams, outbound routing, buffering and replay.
//!
//! Each open SSE connection is represented by an unbounded channel whose receiver feeds the
//! HTTP response body. A failed send means the receiver is gone (client disconnected), so the
//! stream is detached on the spot and the message is routed to the next candidate or buffered.

use crate::config::StreamConfig;
use crate::error::{Result, TransportError};
use crate::session::SessionId;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub type StreamId = u64;
/// Session-scoped, monotonically increasing SSE event id.
pub type EventId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEvent {
    pub id: EventId,
    /// Serialized JSON-RPC message.
    pub data: Arc<str>,
}

pub type StreamSender = mpsc::UnboundedSender<OutboundEvent>;
pub type StreamReceiver = mpsc::UnboundedReceiver<OutboundEvent>;

#[must_use]
pub fn stream_channel() -> (StreamSender, StreamReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Opened by GET; carries server-initiated messages and redirected responses.
    Standalone,
    /// The body of a stream-mode POST; carries the responses to that POST's requests.
    Request,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamHandle {
    pub session_id: SessionId,
    pub stream_id: StreamId,
    pub kind: StreamKind,
}

/// Where a message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Written { stream_id: StreamId, event_id: EventId },
    Buffered { event_id: EventId },
}

#[derive(Debug)]
struct StreamSlot {
    handle: StreamHandle,
    sender: StreamSender,
    opened_at: Instant,
    last_event_id: Option<EventId>,
}

#[derive(Debug)]
struct ReplayEntry {
    event: OutboundEvent,
    at: Instant,
}

#[derive(Debug, Default)]
struct SessionStreams {
    /// Attach order; the last standalone slot is the preferred fallback.
    streams: Vec<StreamSlot>,
    pending_outbound: VecDeque<OutboundEvent>,
    replay: VecDeque<ReplayEntry>,
    next_event_id: EventId,
}

pub struct StreamMultiplexer {
    sessions: HashMap<SessionId, SessionStreams>,
    next_stream_id: StreamId,
    pending_limit: usize,
    replay_max_events: usize,
    replay_max_age: Duration,
}

impl StreamMultiplexer {
    #[must_use]
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            next_stream_id: 1,
            pending_limit: config.pending_outbound_limit.max(1),
            replay_max_events: config.replay_max_events,
            replay_max_age: config.replay_max_age(),
        }
    }

    /// Start routing for a freshly created session.
    pub fn open_session(&mut self, session_id: &SessionId) {
        self.sessions.entry(session_id.clone()).or_default();
    }

    /// Drop every stream and buffer of a session. Dropping the senders ends the SSE bodies.
    pub fn remove_session(&mut self, session_id: &SessionId) -> Vec<StreamHandle> {
        self.sessions
            .remove(session_id)
            .map(|s| s.streams.into_iter().map(|slot| slot.handle).collect())
            .unwrap_or_default()
    }

    /// Register an open connection for a session.
    ///
    /// Standalone streams first receive retained events after `last_event_id` (if given), then
    /// the pending-outbound queue in enqueue order, before any new traffic.
    ///
    /// # Errors
    ///
    /// [`TransportError::SessionNotFound`] if the session is not routed here.
    pub fn attach(
        &mut self,
        session_id: &SessionId,
        kind: StreamKind,
        sender: StreamSender,
        last_event_id: Option<EventId>,
        now: Instant,
    ) -> Result<StreamHandle> {
        let replay_max_events = self.replay_max_events;
        let replay_max_age = self.replay_max_age;
        let Some(entry) = self.sessions.get_mut(session_id) else {
            return Err(TransportError::SessionNotFound(session_id.to_string()));
        };

        let handle = StreamHandle {
            session_id: session_id.clone(),
            stream_id: self.next_stream_id,
            kind,
        };
        self.next_stream_id += 1;

        let mut slot = StreamSlot {
            handle: handle.clone(),
            sender,
            opened_at: now,
            last_event_id: None,
        };

        if kind == StreamKind::Standalone {
            prune_replay(&mut entry.replay, replay_max_events, replay_max_age, now);

            if let Some(after) = last_event_id {
                let replayed: Vec<OutboundEvent> = entry
                    .replay
                    .iter()
                    .filter(|r| r.event.id > after)
                    .map(|r| r.event.clone())
                    .collect();
                for event in replayed {
                    let id = event.id;
                    if slot.sender.send(event).is_err() {
                        return Ok(handle);
                    }
                    slot.last_event_id = Some(id);
                }
            }

            while let Some(event) = entry.pending_outbound.pop_front() {
                if let Err(mpsc::error::SendError(event)) = slot.sender.send(event.clone()) {
                    entry.pending_outbound.push_front(event);
                    return Ok(handle);
                }
                slot.last_event_id = Some(event.id);
                record_replay(&mut entry.replay, event, now, replay_max_events);
            }
        }

        tracing::debug!(
            mcp_session_id = %session_id,
            stream_id = handle.stream_id,
            kind = ?kind,
            "stream attached"
        );
        entry.streams.push(slot);
        Ok(handle)
    }

    /// Route a message to `target` if it is open, else to the newest standalone stream, else
    /// into the bounded pending-outbound queue.
    ///
    /// # Errors
    ///
    /// [`TransportError::SessionNotFound`] if the session is not routed here.
    pub fn send(
        &mut self,
        session_id: &SessionId,
        message: &serde_json::Value,
        target: Option<StreamId>,
        now: Instant,
    ) -> Result<Delivery> {
        let pending_limit = self.pending_limit;
        let replay_max_events = self.replay_max_events;
        let Some(entry) = self.sessions.get_mut(session_id) else {
            return Err(TransportError::SessionNotFound(session_id.to_string()));
        };

        entry.next_event_id += 1;
        let event = OutboundEvent {
            id: entry.next_event_id,
            data: message.to_string().into(),
        };

        loop {
            let candidate = target
                .and_then(|t| entry.streams.iter().position(|s| s.handle.stream_id == t))
                .or_else(|| {
                    entry
                        .streams
                        .iter()
                        .rposition(|s| s.handle.kind == StreamKind::Standalone)
                });
            let Some(idx) = candidate else {
                break;
            };

            let slot = &mut entry.streams[idx];
            if slot.sender.send(event.clone()).is_ok() {
                slot.last_event_id = Some(event.id);
                let stream_id = slot.handle.stream_id;
                if slot.handle.kind == StreamKind::Standalone {
                    record_replay(&mut entry.replay, event.clone(), now, replay_max_events);
                }
                return Ok(Delivery::Written {
                    stream_id,
                    event_id: event.id,
                });
            }

            let gone = entry.streams.remove(idx);
            tracing::debug!(
                mcp_session_id = %session_id,
                stream_id = gone.handle.stream_id,
                open_ms = now.saturating_duration_since(gone.opened_at).as_millis() as u64,
                "stream write failed; client disconnected"
            );
        }

        if entry.pending_outbound.len() >= pending_limit
            && let Some(dropped) = entry.pending_outbound.pop_front()
        {
            tracing::warn!(
                mcp_session_id = %session_id,
                event_id = dropped.id,
                limit = pending_limit,
                "pending outbound queue full; dropping oldest message"
            );
        }
        let event_id = event.id;
        entry.pending_outbound.push_back(event);
        Ok(Delivery::Buffered { event_id })
    }

    /// Remove a stream. Returns false if it was already gone.
    pub fn detach(&mut self, handle: &StreamHandle) -> bool {
        let Some(entry) = self.sessions.get_mut(&handle.session_id) else {
            return false;
        };
        let before = entry.streams.len();
        entry
            .streams
            .retain(|s| s.handle.stream_id != handle.stream_id);
        let removed = entry.streams.len() != before;
        if removed {
            tracing::debug!(
                mcp_session_id = %handle.session_id,
                stream_id = handle.stream_id,
                remaining = entry.streams.len(),
                "stream detached"
            );
        }
        removed
    }

    /// Server-side close: the body ends once the receiver has drained what was already sent.
    pub fn close(&mut self, handle: &StreamHandle) -> bool {
        let closed = self.detach(handle);
        if closed {
            tracing::debug!(
                mcp_session_id = %handle.session_id,
                stream_id = handle.stream_id,
                "stream closed by server"
            );
        }
        closed
    }

    #[must_use]
    pub fn is_open(&self, handle: &StreamHandle) -> bool {
        self.sessions.get(&handle.session_id).is_some_and(|s| {
            s.streams
                .iter()
                .any(|slot| slot.handle.stream_id == handle.stream_id)
        })
    }

    #[must_use]
    pub fn open_streams(&self, session_id: &SessionId) -> usize {
        self.sessions.get(session_id).map_or(0, |s| s.streams.len())
    }

    #[must_use]
    pub fn pending_len(&self, session_id: &SessionId) -> usize {
        self.sessions
            .get(session_id)
            .map_or(0, |s| s.pending_outbound.len())
    }

    #[must_use]
    pub fn last_event_id(&self, handle: &StreamHandle) -> Option<EventId> {
        self.sessions
            .get(&handle.session_id)?
            .streams
            .iter()
            .find(|s| s.handle.stream_id == handle.stream_id)?
            .last_event_id
    }
}

fn record_replay(
    replay: &mut VecDeque<ReplayEntry>,
    event: OutboundEvent,
    now: Instant,
    max_events: usize,
) {
    if max_events == 0 {
        return;
    }
    while replay.len() >= max_events {
        replay.pop_front();
    }
    replay.push_back(ReplayEntry { event, at: now });
}

fn prune_replay(
    replay: &mut VecDeque<ReplayEntry>,
    max_events: usize,
    max_age: Duration,
    now: Instant,
) {
    while replay.len() > max_events {
        replay.pop_front();
    }
    while replay
        .front()
        .is_some_and(|r| now.saturating_duration_since(r.at) > max_age)
    {
        replay.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::{Delivery, StreamKind, StreamMultiplexer, StreamReceiver, stream_channel};
    use crate::config::StreamConfig;
    use crate::error::TransportError;
    use crate::session::SessionId;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::time::Instant;

    fn mux(pending: usize, replay: usize) -> StreamMultiplexer {
        StreamMultiplexer::new(&StreamConfig {
            pending_outbound_limit: pending,
            replay_max_events: replay,
            replay_max_age_ms: 60_000,
            keep_alive_secs: 15,
        })
    }

    fn drain(rx: &mut StreamReceiver) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(serde_json::from_str(&ev.data).expect("json"));
        }
        out
    }

    #[test]
    fn attach_to_unknown_session_fails() {
        let mut m = mux(8, 8);
        let (tx, _rx) = stream_channel();
        let err = m
            .attach(&"nope".into(), StreamKind::Standalone, tx, None, Instant::now())
            .expect_err("unknown");
        assert!(matches!(err, TransportError::SessionNotFound(_)));
    }

    #[test]
    fn buffered_messages_flush_in_order_before_live_traffic() {
        let mut m = mux(8, 8);
        let s: SessionId = "s".into();
        let now = Instant::now();
        m.open_session(&s);

        let a = m.send(&s, &json!("A"), None, now).expect("send A");
        let b = m.send(&s, &json!("B"), None, now).expect("send B");
        assert!(matches!(a, Delivery::Buffered { .. }));
        assert!(matches!(b, Delivery::Buffered { .. }));
        assert_eq!(m.pending_len(&s), 2);

        let (tx, mut rx) = stream_channel();
        let handle = m
            .attach(&s, StreamKind::Standalone, tx, None, now)
            .expect("attach");
        m.send(&s, &json!("C"), None, now).expect("send C");

        assert_eq!(drain(&mut rx), vec![json!("A"), json!("B"), json!("C")]);
        assert_eq!(m.pending_len(&s), 0);
        assert_eq!(m.last_event_id(&handle), Some(3));
    }

    #[test]
    fn pending_queue_drops_oldest_when_full() {
        let mut m = mux(2, 8);
        let s: SessionId = "s".into();
        let now = Instant::now();
        m.open_session(&s);
        for v in ["A", "B", "C"] {
            m.send(&s, &json!(v), None, now).expect("send");
        }
        assert_eq!(m.pending_len(&s), 2);

        let (tx, mut rx) = stream_channel();
        m.attach(&s, StreamKind::Standalone, tx, None, now)
            .expect("attach");
        assert_eq!(drain(&mut rx), vec![json!("B"), json!("C")]);
    }

    #[test]
    fn write_failure_detaches_and_falls_back_to_buffer() {
        let mut m = mux(8, 8);
        let s: SessionId = "s".into();
        let now = Instant::now();
        m.open_session(&s);

        let (tx, rx) = stream_channel();
        let handle = m
            .attach(&s, StreamKind::Standalone, tx, None, now)
            .expect("attach");
        drop(rx);

        let d = m.send(&s, &json!("lost?"), None, now).expect("send");
        assert!(matches!(d, Delivery::Buffered { .. }));
        assert!(!m.is_open(&handle));
        assert_eq!(m.open_streams(&s), 0);

        let (tx2, mut rx2) = stream_channel();
        m.attach(&s, StreamKind::Standalone, tx2, None, now)
            .expect("reattach");
        assert_eq!(drain(&mut rx2), vec![json!("lost?")]);
    }

    #[test]
    fn targeted_send_prefers_request_stream_then_standalone() {
        let mut m = mux(8, 8);
        let s: SessionId = "s".into();
        let now = Instant::now();
        m.open_session(&s);

        let (gtx, mut grx) = stream_channel();
        m.attach(&s, StreamKind::Standalone, gtx, None, now)
            .expect("get stream");
        let (ptx, mut prx) = stream_channel();
        let post = m
            .attach(&s, StreamKind::Request, ptx, None, now)
            .expect("post stream");

        m.send(&s, &json!("resp"), Some(post.stream_id), now)
            .expect("send");
        m.send(&s, &json!("note"), None, now).expect("send");
        assert_eq!(drain(&mut prx), vec![json!("resp")]);
        assert_eq!(drain(&mut grx), vec![json!("note")]);

        assert!(m.detach(&post));
        assert!(!m.detach(&post));
        m.send(&s, &json!("late"), Some(post.stream_id), now)
            .expect("send");
        assert_eq!(drain(&mut grx), vec![json!("late")]);
    }

    #[test]
    fn last_event_id_replays_only_newer_events() {
        let mut m = mux(8, 8);
        let s: SessionId = "s".into();
        let now = Instant::now();
        m.open_session(&s);

        let (tx, mut rx) = stream_channel();
        let first = m
            .attach(&s, StreamKind::Standalone, tx, None, now)
            .expect("attach");
        for v in ["1", "2", "3"] {
            m.send(&s, &json!(v), None, now).expect("send");
        }
        assert_eq!(drain(&mut rx).len(), 3);
        m.detach(&first);

        m.send(&s, &json!("4"), None, now).expect("buffered");

        let (tx2, mut rx2) = stream_channel();
        m.attach(&s, StreamKind::Standalone, tx2, Some(1), now)
            .expect("resume");
        assert_eq!(
            drain(&mut rx2),
            vec![json!("2"), json!("3"), json!("4")]
        );
    }

    #[test]
    fn replay_window_is_bounded_by_count_and_age() {
        let mut m = mux(8, 2);
        let s: SessionId = "s".into();
        let t0 = Instant::now();
        m.open_session(&s);

        let (tx, rx) = stream_channel();
        let h = m
            .attach(&s, StreamKind::Standalone, tx, None, t0)
            .expect("attach");
        for v in ["1", "2", "3"] {
            m.send(&s, &json!(v), None, t0).expect("send");
        }
        drop(rx);
        m.detach(&h);

        let (tx2, mut rx2) = stream_channel();
        let h2 = m
            .attach(&s, StreamKind::Standalone, tx2, Some(0), t0)
            .expect("resume");
        assert_eq!(drain(&mut rx2), vec![json!("2"), json!("3")]);
        m.detach(&h2);

        let (tx3, mut rx3) = stream_channel();
        m.attach(
            &s,
            StreamKind::Standalone,
            tx3,
            Some(0),
            t0 + Duration::from_secs(120),
        )
        .expect("late resume");
        assert!(drain(&mut rx3).is_empty());
    }

    #[test]
    fn remove_session_closes_streams() {
        let mut m = mux(8, 8);
        let s: SessionId = "s".into();
        let now = Instant::now();
        m.open_session(&s);
        let (tx, mut rx) = stream_channel();
        m.attach(&s, StreamKind::Standalone, tx, None, now)
            .expect("attach");

        assert_eq!(m.remove_session(&s).len(), 1);
        assert!(m.remove_session(&s).is_empty());
        assert!(rx.try_recv().is_err());
        assert!(matches!(
            m.send(&s, &json!("x"), None, now),
            Err(TransportError::SessionNotFound(_))
        ));
    }
}
