//! Interrupt endpoints: list, get, resolve.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use caphub::InterruptFilter;
use serde::Deserialize;
use serde_json::Value;

use crate::app::AppState;
use crate::response::{err, ok};

pub(crate) async fn list(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<InterruptFilter>,
) -> Response {
    ok(state.hub.interrupts().list(&filter))
}

pub(crate) async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.hub.interrupts().get(&id) {
        Ok(interrupt) => ok(interrupt),
        Err(e) => err(&e),
    }
}

#[derive(Deserialize)]
pub(crate) struct ResolveBody {
    response: Value,
}

pub(crate) async fn resolve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ResolveBody>,
) -> Response {
    match state.hub.interrupts().resolve(&id, body.response) {
        Ok(interrupt) => ok(interrupt),
        Err(e) => err(&e),
    }
}
