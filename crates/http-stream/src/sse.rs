//! SSE response body backed by a multiplexer stream channel.

use crate::multiplexer::{OutboundEvent, StreamHandle, StreamReceiver};
use crate::transport::Shared;
use axum::response::sse::Event;
use futures::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

/// Yields one `message` event per outbound JSON-RPC message.
///
/// Dropping it (the client went away or the body finished) detaches the stream handle.
pub(crate) struct EventStream {
    rx: StreamReceiver,
    _guard: DetachGuard,
}

impl EventStream {
    pub(crate) fn new(rx: StreamReceiver, shared: Weak<Shared>, handle: StreamHandle) -> Self {
        Self {
            rx,
            _guard: DetachGuard { shared, handle },
        }
    }
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
            .map(|ev| ev.map(|ev| Ok(to_sse_event(&ev))))
    }
}

fn to_sse_event(ev: &OutboundEvent) -> Event {
    Event::default()
        .event("message")
        .id(ev.id.to_string())
        .data(ev.data.as_ref())
}

struct DetachGuard {
    shared: Weak<Shared>,
    handle: StreamHandle,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_stream_dropped(&self.handle);
        }
    }
}
