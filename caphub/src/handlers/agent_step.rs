//! Sub-agent handler: hands control to another registered agent.
//!
//! The child run inherits the parent's remaining deadline and counts against
//! the called agent's concurrency limit.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{ErrorCode, HubError, HubResult};
use crate::handler::{HandlerMetadata, HandlerOutput, OperationKind, StepHandler};
use crate::handlers::payload_text;
use crate::run::{ExecutionContext, RunInput, RunOptions, RunStatus, StepKind};

pub struct AgentStepHandler {
    meta: HandlerMetadata,
}

impl AgentStepHandler {
    pub fn new(priority: i32) -> Self {
        Self {
            meta: HandlerMetadata {
                name: "agent-dispatch".to_string(),
                version: crate::registry::Version::new(1, 0, 0),
                operation: OperationKind::AgentInvocation,
                description: "invoke a sub-agent as a child run".to_string(),
                required_capabilities: Default::default(),
                priority,
            },
        }
    }
}

#[async_trait]
impl StepHandler for AgentStepHandler {
    fn metadata(&self) -> &HandlerMetadata {
        &self.meta
    }

    async fn execute(&self, ctx: &ExecutionContext) -> HubResult<HandlerOutput> {
        let input = ctx.input();
        let target = payload_text(&input, &["agent_id", "target"])
            .ok_or_else(|| HubError::invalid("agent_invocation input has no agent_id"))?;
        if target == ctx.agent().agent_id {
            return Err(HubError::invalid("agent cannot invoke itself"));
        }
        let child_operation = input
            .payload
            .get("operation")
            .and_then(Value::as_str)
            .map(str::parse)
            .transpose()?;
        let child_payload = input
            .payload
            .get("payload")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let step = ctx
            .add_step(
                StepKind::AgentCall,
                format!("call-{target}"),
                json!({ "agent_id": target, "operation": child_operation, "payload": child_payload.clone() }),
            )
            .await?;
        if step.replayed {
            let output = step.step.output.clone().unwrap_or(Value::Null);
            return Ok(HandlerOutput::structured(output));
        }
        ctx.note_called_agent(&step.step.step_id, &target);

        let child = ctx
            .call_agent(RunInput {
                agent_id: target.clone(),
                thread_id: None,
                messages: input.messages.clone(),
                operation: child_operation,
                payload: child_payload,
                options: RunOptions::default(),
            })
            .await;

        match child {
            Ok(run) if run.status == RunStatus::Completed => {
                let output = run.output.unwrap_or_default();
                let value = json!({
                    "run_id": run.run_id,
                    "response": output.response.clone(),
                    "data": output.data,
                });
                ctx.complete_step(&step.step.step_id, Ok(value.clone())).await?;
                Ok(HandlerOutput {
                    response: output.response,
                    data: Some(value),
                    artifacts: output.artifacts,
                })
            }
            Ok(run) => {
                let err = HubError::new(
                    ErrorCode::RunExecutionFailed,
                    format!(
                        "sub-agent run {} ended {}: {}",
                        run.run_id,
                        run.status.as_str(),
                        run.error.as_ref().map(|e| e.message.as_str()).unwrap_or("no detail")
                    ),
                )
                .with_context("called_agent", target);
                ctx.complete_step(&step.step.step_id, Err(&err)).await?;
                Err(err)
            }
            Err(err) => {
                ctx.complete_step(&step.step.step_id, Err(&err)).await?;
                Err(err)
            }
        }
    }
}
