//! Response envelope and error-code → HTTP status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use caphub::{ErrorCode, HubError};
use serde::Serialize;
use serde_json::json;

pub(crate) fn ok<T: Serialize>(data: T) -> Response {
    (
        StatusCode::OK,
        Json(json!({ "success": true, "data": data })),
    )
        .into_response()
}

pub(crate) fn created<T: Serialize>(data: T) -> Response {
    (
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": data })),
    )
        .into_response()
}

pub(crate) fn err(error: &HubError) -> Response {
    (
        status_for(error.code),
        Json(json!({
            "success": false,
            "error": {
                "code": error.code.as_str(),
                "message": error.message,
                "details": error.context,
            }
        })),
    )
        .into_response()
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::ValidInput | ErrorCode::ValidSchema => StatusCode::BAD_REQUEST,
        ErrorCode::AgentNotFound
        | ErrorCode::ThreadNotFound
        | ErrorCode::RunNotFound
        | ErrorCode::InterruptNotFound => StatusCode::NOT_FOUND,
        ErrorCode::RunTimeout => StatusCode::REQUEST_TIMEOUT,
        ErrorCode::AgentConflict
        | ErrorCode::HandlerConflict
        | ErrorCode::InterruptConflict
        | ErrorCode::ThreadClosed
        | ErrorCode::RunCancelled => StatusCode::CONFLICT,
        ErrorCode::InterruptExpired => StatusCode::GONE,
        ErrorCode::LimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::AgentNotReady | ErrorCode::AgentUnhealthy | ErrorCode::NetUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorCode::RunExecutionFailed
        | ErrorCode::NetUpstream
        | ErrorCode::RagQueryFailed
        | ErrorCode::TimeoutOperation
        | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
