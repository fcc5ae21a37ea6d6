//! Agent endpoints: list, register, get, update, delete, health, discover.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use caphub::{AgentPatch, AgentSpec, AgentStatus, DiscoverCriteria};
use serde::Deserialize;

use crate::app::AppState;
use crate::response::{created, err, ok};

#[derive(Deserialize)]
pub(crate) struct ListQuery {
    system: Option<String>,
    #[serde(rename = "type")]
    agent_type: Option<String>,
    status: Option<AgentStatus>,
    limit: Option<usize>,
    offset: Option<usize>,
}

pub(crate) async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let criteria = DiscoverCriteria {
        system: query.system,
        agent_type: query.agent_type,
        status: query.status,
        limit: query.limit,
        offset: query.offset,
        ..Default::default()
    };
    ok(state.hub.registry().discover(&criteria))
}

pub(crate) async fn register(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<AgentSpec>,
) -> Response {
    match state.hub.registry().register(spec).await {
        Ok(agent) => created(agent),
        Err(e) => err(&e),
    }
}

pub(crate) async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.hub.registry().get(&id) {
        Ok(agent) => ok(agent),
        Err(e) => err(&e),
    }
}

pub(crate) async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<AgentPatch>,
) -> Response {
    match state.hub.registry().update(&id, patch).await {
        Ok(agent) => ok(agent),
        Err(e) => err(&e),
    }
}

pub(crate) async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.hub.registry().delete(&id).await {
        Ok(()) => ok(serde_json::json!({ "deleted": id })),
        Err(e) => err(&e),
    }
}

pub(crate) async fn health(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.hub.registry().health(&id) {
        Ok(health) => ok(health),
        Err(e) => err(&e),
    }
}

pub(crate) async fn discover(
    State(state): State<Arc<AppState>>,
    Json(criteria): Json<DiscoverCriteria>,
) -> Response {
    ok(state.hub.registry().discover(&criteria))
}
