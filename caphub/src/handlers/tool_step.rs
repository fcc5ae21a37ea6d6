//! Tool-call handler: one named tool invocation through the tool seam.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{ErrorCode, HubError, HubResult};
use crate::handler::{HandlerMetadata, HandlerOutput, OperationKind, StepHandler};
use crate::handlers::{approval_gate, payload_text};
use crate::run::{ExecutionContext, StepKind};

pub struct ToolStepHandler {
    meta: HandlerMetadata,
}

impl ToolStepHandler {
    pub fn new(priority: i32) -> Self {
        Self {
            meta: HandlerMetadata {
                name: "tool-invoke".to_string(),
                version: crate::registry::Version::new(1, 0, 0),
                operation: OperationKind::ToolCall,
                description: "invoke one named tool from the agent's tool source".to_string(),
                required_capabilities: Default::default(),
                priority,
            },
        }
    }
}

#[async_trait]
impl StepHandler for ToolStepHandler {
    fn metadata(&self) -> &HandlerMetadata {
        &self.meta
    }

    async fn execute(&self, ctx: &ExecutionContext) -> HubResult<HandlerOutput> {
        let input = ctx.input();
        let tool = payload_text(&input, &["tool"])
            .ok_or_else(|| HubError::invalid("tool_call input has no tool name"))?;
        if !ctx.agent().capabilities.tools.is_empty()
            && !ctx.agent().capabilities.tools.contains(&tool)
        {
            return Err(HubError::invalid(format!(
                "agent {} does not expose tool {tool}",
                ctx.agent().agent_id
            )));
        }
        let args = input.payload.get("args").cloned().unwrap_or(Value::Null);

        approval_gate(ctx, &format!("tool {tool}")).await?;

        let step = ctx
            .add_step(
                StepKind::ToolCall,
                tool.clone(),
                json!({ "tool": tool, "args": args }),
            )
            .await?;
        if step.replayed {
            let output = step.step.output.clone().unwrap_or(Value::Null);
            return Ok(HandlerOutput::structured(output));
        }

        ctx.note_tool_calling(&step.step.step_id, &tool);
        let token = ctx.cancellation();
        let result = tokio::select! {
            out = ctx.tools().call(&tool, &args) => out,
            _ = token.cancelled() => Err(HubError::new(ErrorCode::RunCancelled, "tool call aborted")),
        };
        match result {
            Ok(output) => {
                ctx.note_tool_result(&step.step.step_id, &tool, true);
                ctx.complete_step(&step.step.step_id, Ok(output.clone())).await?;
                Ok(HandlerOutput::structured(output))
            }
            Err(err) => {
                ctx.note_tool_result(&step.step.step_id, &tool, false);
                ctx.complete_step(&step.step.step_id, Err(&err)).await?;
                Err(err)
            }
        }
    }
}
