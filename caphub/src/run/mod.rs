//! Run and step data model, plus the executor machinery.
//!
//! The executor exclusively owns runs and steps; other components are
//! referenced by identifier only.

mod checkpoint;
mod context;
mod executor;
mod queue;

pub use checkpoint::{CheckpointStore, MemoryCheckpointStore, RunSnapshot, SqliteCheckpointStore};
pub use context::{ExecutionContext, StepGuard};
pub use executor::{ExecutorConfig, ExecutorParts, RunExecutor};
pub use queue::{LocalQueue, QueueClaim, QueueJob, WorkQueue};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HubError;
use crate::handler::OperationKind;
use crate::llm::LlmUsage;
use crate::thread::{ContextStrategy, NewMessage};

/// Run lifecycle states (§ state machine). `pending → queued` is skipped in
/// local mode; completed/failed/cancelled/timeout are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Queued,
    Running,
    Streaming,
    Interrupted,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled | RunStatus::Timeout
        )
    }

    /// Legal transitions. A terminal status is never overwritten.
    pub fn can_transition(self, to: RunStatus) -> bool {
        use RunStatus::*;
        match self {
            Pending => matches!(to, Queued | Running | Cancelled),
            Queued => matches!(to, Running | Cancelled),
            Running => matches!(to, Streaming | Interrupted | Completed | Failed | Cancelled | Timeout),
            Streaming => matches!(to, Interrupted | Completed | Failed | Cancelled | Timeout),
            Interrupted => matches!(to, Running | Failed | Cancelled),
            Completed | Failed | Cancelled | Timeout => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Streaming => "streaming",
            RunStatus::Interrupted => "interrupted",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Timeout => "timeout",
        }
    }
}

/// Step kinds a handler may record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    LlmCall,
    ToolCall,
    AgentCall,
    Decision,
    SkillExecution,
    KnowledgeQuery,
    ParallelExecution,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::LlmCall => "llm_call",
            StepKind::ToolCall => "tool_call",
            StepKind::AgentCall => "agent_call",
            StepKind::Decision => "decision",
            StepKind::SkillExecution => "skill_execution",
            StepKind::KnowledgeQuery => "knowledge_query",
            StepKind::ParallelExecution => "parallel_execution",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

/// Failure mode for a `parallel_execution` step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelPolicy {
    /// Any child failure fails the parent.
    #[default]
    Strict,
    /// Failed children are recorded; the parent completes with the rest.
    Lenient,
}

/// One atomic unit inside a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub name: String,
    pub status: StepStatus,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub called_agent: Option<String>,
    /// Parent id for children of a `parallel_execution` step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_policy: Option<ParallelPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Per-run execution options supplied by the caller.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_strategy: Option<ContextStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_budget_tokens: Option<u32>,
}

/// Caller-submitted run request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunInput {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<NewMessage>,
    /// Explicit operation; absent means the router pattern-detects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationKind>,
    /// Free-form context map inspected by pattern detection and handlers.
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub options: RunOptions,
}

/// Serializable view of the error that terminated a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunErrorInfo {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&HubError> for RunErrorInfo {
    fn from(err: &HubError) -> Self {
        Self {
            code: err.code.as_str().to_string(),
            message: err.message.clone(),
            retryable: err.retryable,
        }
    }
}

/// Assembled result of a completed run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Value>,
    #[serde(default)]
    pub usage: LlmUsage,
    #[serde(default)]
    pub duration_ms: u64,
}

/// One execution of an agent against an input.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub status: RunStatus,
    pub input: RunInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<RunOutput>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunErrorInfo>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(input: RunInput) -> Self {
        Self {
            run_id: format!("run-{}", uuid::Uuid::new_v4()),
            agent_id: input.agent_id.clone(),
            thread_id: input.thread_id.clone(),
            status: RunStatus::Pending,
            input,
            output: None,
            steps: Vec::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_never_transition() {
        use RunStatus::*;
        for terminal in [Completed, Failed, Cancelled, Timeout] {
            for to in [
                Pending, Queued, Running, Streaming, Interrupted, Completed, Failed, Cancelled,
                Timeout,
            ] {
                assert!(!terminal.can_transition(to), "{terminal:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn state_machine_edges() {
        use RunStatus::*;
        assert!(Pending.can_transition(Queued));
        assert!(Pending.can_transition(Running)); // local mode skips queued
        assert!(Queued.can_transition(Running));
        assert!(Running.can_transition(Streaming));
        assert!(Running.can_transition(Interrupted));
        assert!(Streaming.can_transition(Timeout));
        assert!(Interrupted.can_transition(Running));
        assert!(Interrupted.can_transition(Cancelled));
        assert!(!Interrupted.can_transition(Streaming));
        assert!(!Queued.can_transition(Streaming));
    }

    #[test]
    fn run_input_deserializes_with_defaults() {
        let input: RunInput = serde_json::from_str(
            r#"{"agent_id":"billing","payload":{"query":"refund policy"}}"#,
        )
        .unwrap();
        assert_eq!(input.agent_id, "billing");
        assert!(input.messages.is_empty());
        assert!(input.operation.is_none());
        assert_eq!(input.payload["query"], "refund policy");
        assert!(!input.options.stream);
    }
}
