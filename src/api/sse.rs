//! SSE bridging for exchange event streams.
//!
//! Wire contract: one frame per event, named after the event type and
//! carrying the full event JSON as data, with the CLI event uuid as the
//! frame id when present. A `done` frame with data `[DONE]` closes the
//! stream after the `result` event. The first stream failure becomes a
//! single `error` frame with `{"error": <message>}` and ends the stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tracing::error;

use crate::events::AgentEvent;
use crate::manager::BusyGuard;
use crate::session::SessionError;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Build the SSE response for one exchange.
///
/// The optional busy guard rides inside the stream so the session returns
/// to idle when the client disconnects mid-answer, not just on clean
/// completion. One-shot prompt streams have no registry entry and pass
/// `None`.
pub fn session_frames<S>(
    events: S,
    guard: Option<BusyGuard>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = Result<AgentEvent, SessionError>> + Send + 'static,
{
    Sse::new(frames(events, guard)).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keepalive"),
    )
}

fn frames<S>(events: S, guard: Option<BusyGuard>) -> impl Stream<Item = Result<Event, Infallible>>
where
    S: Stream<Item = Result<AgentEvent, SessionError>> + Send + 'static,
{
    async_stream::stream! {
        let _guard = guard;
        futures::pin_mut!(events);

        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    let finished = event.as_result().is_some();
                    match event_frame(&event) {
                        Ok(frame) => yield Ok(frame),
                        Err(err) => {
                            error!(error = %err, "Failed to encode SSE frame");
                            yield Ok(error_frame("event serialization failed"));
                            return;
                        }
                    }
                    // The result event is always the last word of an
                    // exchange; close out without waiting for EOF.
                    if finished {
                        yield Ok(Event::default().event("done").data("[DONE]"));
                        return;
                    }
                }
                Err(err) => {
                    yield Ok(error_frame(&err.to_string()));
                    return;
                }
            }
        }
    }
}

fn event_frame(event: &AgentEvent) -> Result<Event, axum::Error> {
    let frame = Event::default().event(event.event_name());
    let frame = match event.uuid() {
        Some(id) => frame.id(id),
        None => frame,
    };
    frame.json_data(event)
}

fn error_frame(message: &str) -> Event {
    let payload = serde_json::json!({ "error": message });
    Event::default().event("error").data(payload.to_string())
}
