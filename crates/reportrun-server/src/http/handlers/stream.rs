//! Live progress streaming handler (SSE).

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast;
use tracing::warn;

use reportrun_core::{ProgressEvent, StatusSnapshot, TaskRunId};

use crate::http::ApiError;
use crate::state::AppState;

/// Type alias for boxed SSE stream.
type SseEventStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

/// GET /tasks/:task_id/stream - live progress events.
pub async fn stream_events(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Response {
    let id = TaskRunId::new(&task_id);

    // Subscribe before reading the snapshot so no event can fall
    // between the two.
    let receiver = match state.subscribe(&id).await {
        Some(receiver) => receiver,
        None => return ApiError::NotFound.into_response(),
    };
    let snapshot = match state.snapshot(&id).await {
        Some(snapshot) => snapshot,
        None => return ApiError::NotFound.into_response(),
    };

    Sse::new(event_stream(receiver, snapshot))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Compose the SSE stream: a status snapshot first, then live events
/// until a terminal status event has been forwarded.
///
/// The leading snapshot means a subscriber that attaches (or
/// re-attaches) after the run completed still observes a terminal
/// event immediately instead of waiting on a silent channel.
fn event_stream(
    receiver: broadcast::Receiver<ProgressEvent>,
    snapshot: StatusSnapshot,
) -> SseEventStream {
    let initial_event = ProgressEvent::status(snapshot.status);
    let initial = stream::once(async move {
        Ok::<_, Infallible>(Event::default().json_data(&initial_event).unwrap())
    });

    let live = stream::unfold(
        (receiver, snapshot.is_complete),
        |(mut receiver, terminated)| async move {
            if terminated {
                return None;
            }

            match receiver.recv().await {
                Ok(event) => {
                    let is_terminal = event.is_terminal();
                    Some((
                        Ok(Event::default().json_data(&event).unwrap()),
                        (receiver, is_terminal),
                    ))
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Progress stream lagged, skipping events");
                    Some((
                        Ok(Event::default().comment(format!("skipped {} events", n))),
                        (receiver, false),
                    ))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        },
    );

    Box::pin(initial.chain(live))
}
