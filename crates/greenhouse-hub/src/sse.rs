//! Server-sent event stream endpoint.
//!
//! Clients connect to `GET /api/sse/plants`. The first message is the
//! greeting `data: {"message":"Connected"}`; every transition event then
//! follows as `event: <name>\ndata: <payload>`. Keep-alive comments are sent
//! on the configured interval. The subscriber is unregistered when the
//! client disconnects and the stream is dropped.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use tracing::debug;

use crate::hub::TransportKind;
use crate::state::AppState;

/// Payload of the first message on every stream.
pub const GREETING: &str = r#"{"message":"Connected"}"#;

/// Open an event stream subscriber.
///
/// # Route
///
/// `GET /api/sse/plants`
pub async fn sse_plants(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (registration, rx) = state.hub.register(TransportKind::EventStream);
    debug!(session_id = %registration.session_id(), "Event-stream client connected");

    let greeting = stream::once(async { Ok(Event::default().data(GREETING)) });
    // The registration rides along in the stream state so it is dropped,
    // and the subscriber removed, together with the stream.
    let frames = stream::unfold((rx, registration), |(mut rx, registration)| async move {
        let frame = rx.recv().await?;
        let event = Event::default().event(frame.event).data(frame.data.as_str());
        Some((Ok(event), (rx, registration)))
    });

    Sse::new(greeting.chain(frames)).keep_alive(KeepAlive::new().interval(state.keep_alive))
}
