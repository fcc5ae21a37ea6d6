//! Run endpoints: submit, status, cancel, SSE event stream.
//!
//! SSE frames come from `run-event`: live bus events already carry the
//! enveloped JSON (run_id + monotonic seq), and a finished run replays its
//! stored terminal frame verbatim, so both paths share one wire shape.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use caphub::{EventFilter, Run, RunInput, RunStatus, Subscription};
use futures_util::stream::{self, Stream, StreamExt};
use run_event::{sse_line, EnvelopeState, RunEvent};
use serde::Deserialize;

use crate::app::AppState;
use crate::response::{created, err, ok};

/// Event names visible on the run stream; bus-internal names are filtered.
const SSE_EVENTS: [&str; 9] = [
    "run:started",
    "step:started",
    "step:completed",
    "token",
    "tool:calling",
    "tool:result",
    "interrupt",
    "completed",
    "error",
];

pub(crate) async fn submit(
    State(state): State<Arc<AppState>>,
    Json(input): Json<RunInput>,
) -> Response {
    match state.hub.executor().submit(input).await {
        Ok(run) => created(run),
        Err(e) => err(&e),
    }
}

pub(crate) async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.hub.executor().get(&id).await {
        Ok(run) => ok(run),
        Err(e) => err(&e),
    }
}

#[derive(Deserialize, Default)]
pub(crate) struct CancelBody {
    reason: Option<String>,
}

pub(crate) async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<CancelBody>>,
) -> Response {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "cancelled by caller".to_string());
    match state.hub.executor().cancel(&id, &reason).await {
        Ok(run) => ok(run),
        Err(e) => err(&e),
    }
}

/// The terminal event a finished run published.
fn terminal_run_event(run: &Run) -> RunEvent {
    match run.status {
        RunStatus::Completed => RunEvent::Completed {
            run_id: run.run_id.clone(),
            response: run.output.as_ref().and_then(|o| o.response.clone()),
            usage: run
                .output
                .as_ref()
                .and_then(|o| serde_json::to_value(o.usage).ok()),
        },
        _ => {
            let (code, message) = run
                .error
                .as_ref()
                .map(|e| (e.code.clone(), e.message.clone()))
                .unwrap_or_else(|| ("CAP_RUN_EXECUTION_FAILED".to_string(), String::new()));
            RunEvent::Error {
                run_id: run.run_id.clone(),
                code,
                message,
                status: run.status.as_str().to_string(),
            }
        }
    }
}

/// One frame for a run that was already terminal when the stream opened:
/// the stored enveloped value (same `seq` live subscribers saw), framed by
/// `sse_line`.
async fn terminal_frame(state: &AppState, run: &Run) -> String {
    let event = terminal_run_event(run);
    let value = match state
        .hub
        .executor()
        .terminal_event_value(&run.run_id)
        .await
    {
        Ok(Some(value)) => value,
        // no stored frame (pre-upgrade snapshot): stamp a fresh envelope
        _ => {
            let mut envelope = EnvelopeState::new(run.run_id.clone());
            run_event::to_json(&event, &mut envelope)
                .unwrap_or_else(|_| serde_json::json!({ "run_id": run.run_id }))
        }
    };
    sse_line(&event, &value)
}

struct StreamState {
    sub: Subscription,
    done: bool,
}

fn live_frames(sub: Subscription) -> impl Stream<Item = String> {
    stream::unfold(StreamState { sub, done: false }, |mut st| async move {
        if st.done {
            return None;
        }
        loop {
            match st.sub.recv().await {
                Some(bus_event) => {
                    let name = bus_event.event.name();
                    if !SSE_EVENTS.contains(&name) {
                        continue;
                    }
                    if bus_event.event.is_terminal() {
                        st.done = true;
                    }
                    return Some((sse_line(&bus_event.event, &bus_event.value), st));
                }
                None => return None,
            }
        }
    })
}

fn sse_response(frames: impl Stream<Item = String> + Send + 'static) -> Response {
    let body = Body::from_stream(
        frames.map(|frame| Ok::<_, Infallible>(Bytes::from(frame))),
    );
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// `GET /api/cap/runs/{id}/stream` — Server-Sent Events of run events.
/// The stream closes on any terminal status; a run that is already terminal
/// yields its terminal event immediately.
pub(crate) async fn stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    // subscribe before reading the status so no terminal event is lost
    let sub = state.hub.subscribe(EventFilter::Run(id.clone()));
    let run = match state.hub.executor().get(&id).await {
        Ok(run) => run,
        Err(e) => return err(&e),
    };
    if run.status.is_terminal() {
        let frame = terminal_frame(&state, &run).await;
        return sse_response(stream::once(async move { frame }));
    }
    sse_response(live_frames(sub))
}
