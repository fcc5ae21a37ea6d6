//! Hub error type and code taxonomy.
//!
//! Every error carries a stable code, a message, an optional cause, the
//! `retryable` flag, and a context map. Codes are emitted verbatim on the
//! wire; transports map them to HTTP statuses.

use std::collections::BTreeMap;

use serde_json::Value;

/// Stable error codes. `CAP_*` are hub lifecycle errors; `VALID_*`, `NET_*`,
/// `RAG_*`, and `TIMEOUT_*` are the validation, network, retrieval, and
/// timeout families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    AgentNotFound,
    AgentNotReady,
    AgentUnhealthy,
    AgentConflict,
    ThreadNotFound,
    ThreadClosed,
    RunNotFound,
    RunCancelled,
    RunTimeout,
    RunExecutionFailed,
    InterruptNotFound,
    InterruptExpired,
    InterruptConflict,
    HandlerConflict,
    LimitExceeded,
    ValidInput,
    ValidSchema,
    NetUpstream,
    NetUnavailable,
    RagQueryFailed,
    TimeoutOperation,
    Internal,
}

impl ErrorCode {
    /// Wire form of the code, emitted verbatim.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::AgentNotFound => "CAP_AGENT_NOT_FOUND",
            ErrorCode::AgentNotReady => "CAP_AGENT_NOT_READY",
            ErrorCode::AgentUnhealthy => "CAP_AGENT_UNHEALTHY",
            ErrorCode::AgentConflict => "CAP_AGENT_CONFLICT",
            ErrorCode::ThreadNotFound => "CAP_THREAD_NOT_FOUND",
            ErrorCode::ThreadClosed => "CAP_THREAD_CLOSED",
            ErrorCode::RunNotFound => "CAP_RUN_NOT_FOUND",
            ErrorCode::RunCancelled => "CAP_RUN_CANCELLED",
            ErrorCode::RunTimeout => "CAP_RUN_TIMEOUT",
            ErrorCode::RunExecutionFailed => "CAP_RUN_EXECUTION_FAILED",
            ErrorCode::InterruptNotFound => "CAP_INTERRUPT_NOT_FOUND",
            ErrorCode::InterruptExpired => "CAP_INTERRUPT_EXPIRED",
            ErrorCode::InterruptConflict => "CAP_INTERRUPT_CONFLICT",
            ErrorCode::HandlerConflict => "CAP_HANDLER_CONFLICT",
            ErrorCode::LimitExceeded => "CAP_LIMIT_EXCEEDED",
            ErrorCode::ValidInput => "VALID_INPUT",
            ErrorCode::ValidSchema => "VALID_SCHEMA",
            ErrorCode::NetUpstream => "NET_UPSTREAM",
            ErrorCode::NetUnavailable => "NET_UNAVAILABLE",
            ErrorCode::RagQueryFailed => "RAG_QUERY_FAILED",
            ErrorCode::TimeoutOperation => "TIMEOUT_OPERATION",
            ErrorCode::Internal => "CAP_INTERNAL",
        }
    }

    /// Default retry policy for the code: `NET_*` and `TIMEOUT_OPERATION`
    /// are retried with backoff, everything else propagates immediately.
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::NetUpstream | ErrorCode::NetUnavailable | ErrorCode::TimeoutOperation
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hub error: code + message + optional cause + retryable + context.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct HubError {
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    pub retryable: bool,
    pub context: BTreeMap<String, Value>,
}

pub type HubResult<T> = Result<T, HubError>;

impl HubError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            retryable: code.default_retryable(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_cause(
        mut self,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn agent_not_found(agent_id: &str) -> Self {
        Self::new(ErrorCode::AgentNotFound, format!("agent not found: {agent_id}"))
            .with_context("agent_id", agent_id)
    }

    pub fn agent_not_ready(agent_id: &str, detail: &str) -> Self {
        Self::new(
            ErrorCode::AgentNotReady,
            format!("agent not ready: {agent_id} ({detail})"),
        )
        .with_context("agent_id", agent_id)
    }

    pub fn thread_not_found(thread_id: &str) -> Self {
        Self::new(ErrorCode::ThreadNotFound, format!("thread not found: {thread_id}"))
            .with_context("thread_id", thread_id)
    }

    pub fn thread_closed(thread_id: &str) -> Self {
        Self::new(ErrorCode::ThreadClosed, format!("thread closed: {thread_id}"))
            .with_context("thread_id", thread_id)
    }

    pub fn run_not_found(run_id: &str) -> Self {
        Self::new(ErrorCode::RunNotFound, format!("run not found: {run_id}"))
            .with_context("run_id", run_id)
    }

    pub fn interrupt_not_found(interrupt_id: &str) -> Self {
        Self::new(
            ErrorCode::InterruptNotFound,
            format!("interrupt not found: {interrupt_id}"),
        )
        .with_context("interrupt_id", interrupt_id)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidInput, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Storage-layer failure surfaced through a component boundary.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message).with_context("layer", "storage")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_wire_stable() {
        assert_eq!(ErrorCode::AgentNotFound.as_str(), "CAP_AGENT_NOT_FOUND");
        assert_eq!(ErrorCode::RunTimeout.as_str(), "CAP_RUN_TIMEOUT");
        assert_eq!(ErrorCode::TimeoutOperation.as_str(), "TIMEOUT_OPERATION");
        assert_eq!(ErrorCode::ValidInput.as_str(), "VALID_INPUT");
    }

    #[test]
    fn retryable_families() {
        assert!(ErrorCode::NetUpstream.default_retryable());
        assert!(ErrorCode::NetUnavailable.default_retryable());
        assert!(ErrorCode::TimeoutOperation.default_retryable());
        assert!(!ErrorCode::RunExecutionFailed.default_retryable());
        assert!(!ErrorCode::ValidInput.default_retryable());
    }

    #[test]
    fn builder_carries_context_and_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = HubError::new(ErrorCode::NetUpstream, "upstream unavailable")
            .with_cause(io)
            .with_context("endpoint", "https://llm.example");
        assert!(err.retryable);
        assert!(err.cause.is_some());
        assert_eq!(err.context["endpoint"], "https://llm.example");
        assert_eq!(err.to_string(), "NET_UPSTREAM: upstream unavailable");
    }

    #[test]
    fn explicit_retryable_overrides_default() {
        let err = HubError::new(ErrorCode::RagQueryFailed, "index cold").retryable(true);
        assert!(err.retryable);
    }
}
