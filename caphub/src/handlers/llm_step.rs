//! LLM-backed handler serving reasoning, classification, extraction, and
//! generic operations.

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use crate::error::{ErrorCode, HubError, HubResult};
use crate::handler::{HandlerMetadata, HandlerOutput, OperationKind, StepHandler};
use crate::handlers::{approval_gate, payload_text};
use crate::run::{ExecutionContext, StepKind};
use crate::thread::{MessageMetadata, MessageRole, ThreadMessage};

/// One instance per operation family; all four share the LLM seam.
pub struct LlmStepHandler {
    meta: HandlerMetadata,
}

impl LlmStepHandler {
    pub fn new(operation: OperationKind, priority: i32) -> Self {
        Self {
            meta: HandlerMetadata {
                name: format!("llm-{operation}"),
                version: crate::registry::Version::new(1, 0, 0),
                operation,
                description: format!("{operation} via the configured LLM client"),
                required_capabilities: Default::default(),
                priority,
            },
        }
    }

    /// Extra user message derived from the operation's payload shape.
    fn payload_message(&self, ctx: &ExecutionContext) -> Option<String> {
        let input = ctx.input();
        match self.meta.operation {
            OperationKind::Classification => {
                let text = payload_text(&input, &["text"])?;
                let categories = input
                    .payload
                    .get("categories")
                    .cloned()
                    .unwrap_or_default();
                Some(format!("Classify into {categories}: {text}"))
            }
            OperationKind::Extraction => {
                let text = payload_text(&input, &["text"])?;
                let schema = input.payload.get("schema").cloned().unwrap_or_default();
                Some(format!("Extract {schema} from: {text}"))
            }
            OperationKind::Reasoning => payload_text(&input, &["question"]),
            _ => payload_text(&input, &["message", "request", "text"]),
        }
    }
}

#[async_trait]
impl StepHandler for LlmStepHandler {
    fn metadata(&self) -> &HandlerMetadata {
        &self.meta
    }

    fn idempotent(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &ExecutionContext) -> HubResult<HandlerOutput> {
        approval_gate(ctx, self.meta.operation.as_str()).await?;

        let step = ctx
            .add_step(
                StepKind::LlmCall,
                self.meta.operation.as_str(),
                serde_json::Value::Object(ctx.input().payload),
            )
            .await?;
        if step.replayed {
            let content = step
                .step
                .output
                .as_ref()
                .and_then(|o| o.get("content"))
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string();
            return Ok(HandlerOutput::text(content));
        }

        let mut messages: Vec<ThreadMessage> = ctx.prompt_messages().to_vec();
        if let Some(extra) = self.payload_message(ctx) {
            messages.push(ThreadMessage {
                seq: messages.last().map(|m| m.seq + 1).unwrap_or(1),
                role: MessageRole::User,
                content: extra,
                metadata: MessageMetadata::default(),
                created_at: chrono::Utc::now(),
            });
        }
        if messages.is_empty() {
            let err = HubError::invalid("no messages or recognizable payload for llm call");
            ctx.complete_step(&step.step.step_id, Err(&err)).await?;
            return Err(err);
        }

        let token = ctx.cancellation();
        let reply = if ctx.streaming_enabled() {
            ctx.begin_streaming();
            let (tx, mut rx) = mpsc::channel::<String>(64);
            let invoke = ctx.llm().invoke_stream(&messages, Some(tx));
            tokio::pin!(invoke);
            let mut chunks_open = true;
            loop {
                tokio::select! {
                    chunk = rx.recv(), if chunks_open => {
                        match chunk {
                            Some(chunk) => ctx.emit_token(chunk),
                            None => chunks_open = false,
                        }
                    }
                    out = &mut invoke => {
                        // drain whatever the provider flushed before returning
                        while let Ok(chunk) = rx.try_recv() {
                            ctx.emit_token(chunk);
                        }
                        break out;
                    }
                    _ = token.cancelled() => {
                        break Err(HubError::new(ErrorCode::RunCancelled, "llm call aborted"));
                    }
                }
            }
        } else {
            tokio::select! {
                out = ctx.llm().invoke(&messages) => out,
                _ = token.cancelled() => Err(HubError::new(ErrorCode::RunCancelled, "llm call aborted")),
            }
        };

        match reply {
            Ok(reply) => {
                if let Some(usage) = reply.usage {
                    ctx.update_token_usage(usage);
                }
                ctx.complete_step(
                    &step.step.step_id,
                    Ok(json!({ "content": reply.content, "usage": reply.usage })),
                )
                .await?;
                Ok(HandlerOutput::text(reply.content))
            }
            Err(err) => {
                ctx.complete_step(&step.step.step_id, Err(&err)).await?;
                Err(err)
            }
        }
    }
}
