//! Thread endpoints: create, fetch, update, messages, close.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use caphub::{MessageFilter, NewMessage, ThreadStatus};
use serde::Deserialize;
use serde_json::Value;

use crate::app::AppState;
use crate::response::{created, err, ok};

#[derive(Deserialize)]
pub(crate) struct CreateThreadBody {
    agent_id: String,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
    #[serde(default)]
    initial_messages: Vec<NewMessage>,
}

pub(crate) async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateThreadBody>,
) -> Response {
    // thread creation is gated on the agent existing
    if let Err(e) = state.hub.registry().get(&body.agent_id) {
        return err(&e);
    }
    match state
        .hub
        .threads()
        .create(&body.agent_id, body.metadata, body.initial_messages)
        .await
    {
        Ok(thread) => created(thread),
        Err(e) => err(&e),
    }
}

pub(crate) async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.hub.threads().get(&id).await {
        Ok(thread) => ok(thread),
        Err(e) => err(&e),
    }
}

#[derive(Deserialize)]
pub(crate) struct UpdateThreadBody {
    status: Option<ThreadStatus>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

pub(crate) async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateThreadBody>,
) -> Response {
    if !body.metadata.is_empty() {
        if let Err(e) = state.hub.threads().store().update_metadata(&id, body.metadata).await {
            return err(&e);
        }
    }
    let result = match body.status {
        Some(status) => state.hub.threads().update_status(&id, status).await,
        None => state.hub.threads().get(&id).await,
    };
    match result {
        Ok(thread) => ok(thread),
        Err(e) => err(&e),
    }
}

pub(crate) async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(filter): Query<MessageFilter>,
) -> Response {
    match state.hub.threads().list_messages(&id, &filter).await {
        Ok(messages) => ok(messages),
        Err(e) => err(&e),
    }
}

pub(crate) async fn append(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(message): Json<NewMessage>,
) -> Response {
    match state.hub.threads().append(&id, message).await {
        Ok(stored) => created(stored),
        Err(e) => err(&e),
    }
}

#[derive(Deserialize, Default)]
pub(crate) struct CloseThreadBody {
    summary: Option<String>,
    resolution: Option<String>,
}

pub(crate) async fn close(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<CloseThreadBody>>,
) -> Response {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    match state
        .hub
        .threads()
        .close(&id, body.summary, body.resolution)
        .await
    {
        Ok(thread) => ok(thread),
        Err(e) => err(&e),
    }
}
