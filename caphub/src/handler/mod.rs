//! Step handlers: the units the router dispatches a run's input to.
//!
//! A handler advertises metadata (operation, required capabilities,
//! priority) and executes against the run's execution context. Handlers
//! return a typed output or a `HubError` whose `retryable` flag drives the
//! retry policy; errors never panic across this boundary.

mod registry;
mod router;

pub use registry::HandlerRegistry;
pub use router::{RouteDecision, Router, RouterConfig};

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HubError, HubResult};
use crate::registry::Version;
use crate::run::ExecutionContext;

/// Operation families a handler can serve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Rag,
    Reasoning,
    Classification,
    Extraction,
    Generic,
    ToolCall,
    AgentInvocation,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Rag => "rag",
            OperationKind::Reasoning => "reasoning",
            OperationKind::Classification => "classification",
            OperationKind::Extraction => "extraction",
            OperationKind::Generic => "generic",
            OperationKind::ToolCall => "tool_call",
            OperationKind::AgentInvocation => "agent_invocation",
        }
    }
}

impl std::str::FromStr for OperationKind {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rag" => Ok(OperationKind::Rag),
            "reasoning" => Ok(OperationKind::Reasoning),
            "classification" => Ok(OperationKind::Classification),
            "extraction" => Ok(OperationKind::Extraction),
            "generic" => Ok(OperationKind::Generic),
            "tool_call" => Ok(OperationKind::ToolCall),
            "agent_invocation" => Ok(OperationKind::AgentInvocation),
            other => Err(HubError::invalid(format!("unknown operation: {other}"))),
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a handler advertises to the registry and router.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandlerMetadata {
    pub name: String,
    pub version: Version,
    pub operation: OperationKind,
    pub description: String,
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    /// Routing tiebreaker: highest priority wins.
    #[serde(default)]
    pub priority: i32,
}

/// A handler's contribution to the run output.
#[derive(Clone, Debug, Default)]
pub struct HandlerOutput {
    pub response: Option<String>,
    pub data: Option<Value>,
    pub artifacts: Vec<Value>,
}

impl HandlerOutput {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
            data: None,
            artifacts: Vec::new(),
        }
    }

    pub fn structured(data: Value) -> Self {
        Self {
            response: None,
            data: Some(data),
            artifacts: Vec::new(),
        }
    }
}

/// One operation implementation, routed to by input shape and capability.
#[async_trait]
pub trait StepHandler: Send + Sync {
    fn metadata(&self) -> &HandlerMetadata;

    async fn execute(&self, ctx: &ExecutionContext) -> HubResult<HandlerOutput>;

    /// Idempotent handlers may be resumed after the last completed step on
    /// crash recovery; non-idempotent ones retry the interrupted step.
    fn idempotent(&self) -> bool {
        false
    }
}
