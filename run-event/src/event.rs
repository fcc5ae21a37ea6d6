//! Hub lifecycle event types (type + payload).
//!
//! The `type` tag is the wire name used both on the event bus and as the SSE
//! event name. Run-scoped variants are stamped with the envelope before
//! delivery; registry-scoped variants (`agent:health_changed`) are not.

use serde::Serialize;
use serde_json::Value;

/// One lifecycle event: wire shape is the serde tag plus the payload fields.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    /// A run transitioned to `running` and handler execution began.
    #[serde(rename = "run:started")]
    RunStarted {
        run_id: String,
        agent_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
    },
    /// A run suspended on an interrupt.
    #[serde(rename = "run:interrupted")]
    RunInterrupted {
        run_id: String,
        interrupt_id: String,
    },
    /// A step was created and began executing.
    #[serde(rename = "step:started")]
    StepStarted {
        run_id: String,
        step_id: String,
        name: String,
        step_type: String,
    },
    /// A step reached `completed` or `failed`.
    #[serde(rename = "step:completed")]
    StepCompleted {
        run_id: String,
        step_id: String,
        name: String,
        status: String,
        duration_ms: u64,
    },
    /// One streamed output token from the current handler.
    #[serde(rename = "token")]
    Token { run_id: String, content: String },
    /// A tool invocation is about to start.
    #[serde(rename = "tool:calling")]
    ToolCalling {
        run_id: String,
        step_id: String,
        tool: String,
    },
    /// A tool invocation returned.
    #[serde(rename = "tool:result")]
    ToolResult {
        run_id: String,
        step_id: String,
        tool: String,
        ok: bool,
    },
    /// An interrupt was created for the run (SSE name `interrupt`).
    #[serde(rename = "interrupt")]
    Interrupt {
        run_id: String,
        interrupt_id: String,
        interrupt_type: String,
        priority: String,
        message: String,
    },
    /// An interrupt left its pending window (resolved, expired, or cancelled).
    #[serde(rename = "interrupt:closed")]
    InterruptClosed {
        run_id: String,
        interrupt_id: String,
        status: String,
    },
    /// The run reached `completed`.
    #[serde(rename = "completed")]
    Completed {
        run_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Value>,
    },
    /// The run reached `failed`, `cancelled`, or `timeout`.
    #[serde(rename = "error")]
    Error {
        run_id: String,
        code: String,
        message: String,
        status: String,
    },
    /// An agent's composite health status changed.
    #[serde(rename = "agent:health_changed")]
    AgentHealthChanged {
        agent_id: String,
        from: String,
        to: String,
    },
}

impl RunEvent {
    /// Wire name of this event (the serde tag), used as the SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::RunStarted { .. } => "run:started",
            RunEvent::RunInterrupted { .. } => "run:interrupted",
            RunEvent::StepStarted { .. } => "step:started",
            RunEvent::StepCompleted { .. } => "step:completed",
            RunEvent::Token { .. } => "token",
            RunEvent::ToolCalling { .. } => "tool:calling",
            RunEvent::ToolResult { .. } => "tool:result",
            RunEvent::Interrupt { .. } => "interrupt",
            RunEvent::InterruptClosed { .. } => "interrupt:closed",
            RunEvent::Completed { .. } => "completed",
            RunEvent::Error { .. } => "error",
            RunEvent::AgentHealthChanged { .. } => "agent:health_changed",
        }
    }

    /// The run this event belongs to, if it is run-scoped.
    pub fn run_id(&self) -> Option<&str> {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::RunInterrupted { run_id, .. }
            | RunEvent::StepStarted { run_id, .. }
            | RunEvent::StepCompleted { run_id, .. }
            | RunEvent::Token { run_id, .. }
            | RunEvent::ToolCalling { run_id, .. }
            | RunEvent::ToolResult { run_id, .. }
            | RunEvent::Interrupt { run_id, .. }
            | RunEvent::InterruptClosed { run_id, .. }
            | RunEvent::Completed { run_id, .. }
            | RunEvent::Error { run_id, .. } => Some(run_id),
            RunEvent::AgentHealthChanged { .. } => None,
        }
    }

    /// True when this event terminates an SSE run stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Completed { .. } | RunEvent::Error { .. })
    }

    /// Serializes this event to a JSON object (type + payload only; no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
