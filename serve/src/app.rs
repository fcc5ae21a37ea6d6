//! Axum app: state and router for the `/api/cap` surface.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use caphub::Hub;

pub(crate) struct AppState {
    pub(crate) hub: Arc<Hub>,
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/cap/agents",
            get(crate::agents::list).post(crate::agents::register),
        )
        .route("/api/cap/agents/discover", post(crate::agents::discover))
        .route(
            "/api/cap/agents/:id",
            get(crate::agents::get_one)
                .put(crate::agents::update)
                .delete(crate::agents::delete),
        )
        .route("/api/cap/agents/:id/health", get(crate::agents::health))
        .route("/api/cap/threads", post(crate::threads::create))
        .route(
            "/api/cap/threads/:id",
            get(crate::threads::get_one).put(crate::threads::update),
        )
        .route(
            "/api/cap/threads/:id/messages",
            get(crate::threads::list_messages).post(crate::threads::append),
        )
        .route("/api/cap/threads/:id/close", post(crate::threads::close))
        .route("/api/cap/runs", post(crate::runs::submit))
        .route("/api/cap/runs/:id", get(crate::runs::get_one))
        .route("/api/cap/runs/:id/cancel", post(crate::runs::cancel))
        .route("/api/cap/runs/:id/stream", get(crate::runs::stream))
        .route("/api/cap/interrupts", get(crate::interrupts::list))
        .route("/api/cap/interrupts/:id", get(crate::interrupts::get_one))
        .route(
            "/api/cap/interrupts/:id/resolve",
            post(crate::interrupts::resolve),
        )
        .with_state(state)
}
