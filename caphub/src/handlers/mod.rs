//! Built-in step handlers, one per operation family.
//!
//! These are thin: they exercise the seams (LLM, tools, knowledge, sub-agent
//! dispatch) through the execution-context callbacks. Prompting strategy and
//! retrieval semantics stay with the respective backends.

mod agent_step;
mod llm_step;
mod rag_step;
mod tool_step;

pub use agent_step::AgentStepHandler;
pub use llm_step::LlmStepHandler;
pub use rag_step::RagStepHandler;
pub use tool_step::ToolStepHandler;

use serde_json::{json, Value};

use crate::error::HubResult;
use crate::interrupt::{InterruptKind, InterruptPayload, InterruptPriority};
use crate::run::{ExecutionContext, StepKind};

/// Approval gate for agents with `requires_approval`: suspends on an
/// `approval_required` interrupt and records the response in a decision
/// step's input. Returns the response value (None when the agent's expiry
/// policy resumed without one).
pub(crate) async fn approval_gate(
    ctx: &ExecutionContext,
    action: &str,
) -> HubResult<Option<Value>> {
    if !ctx.agent().extensions.requires_approval {
        return Ok(None);
    }
    // a recovered run that already passed approval must not re-suspend
    if let Some(step) = ctx.take_replayed(StepKind::Decision, "approval") {
        return Ok(step.input.get("response").cloned().filter(|v| !v.is_null()));
    }
    let response = ctx
        .interrupt(
            InterruptKind::ApprovalRequired,
            InterruptPriority::High,
            InterruptPayload {
                message: format!("approval required: {action}"),
                options: vec!["approve".to_string(), "deny".to_string()],
                ..Default::default()
            },
            60_000,
        )
        .await?;
    let decision = ctx
        .add_step(
            StepKind::Decision,
            "approval",
            json!({ "action": action, "response": response }),
        )
        .await?;
    ctx.complete_step(&decision.step.step_id, Ok(Value::Null)).await?;
    Ok(response)
}

/// First non-empty string among the given payload keys.
pub(crate) fn payload_text(input: &crate::run::RunInput, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        input
            .payload
            .get(*key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.is_empty())
    })
}
