//! Retrieval handler: knowledge query plus an LLM synthesis pass.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{ErrorCode, HubError, HubResult};
use crate::handler::{HandlerMetadata, HandlerOutput, OperationKind, StepHandler};
use crate::handlers::payload_text;
use crate::retry::{retry_with, RetryPolicy};
use crate::run::{ExecutionContext, StepKind};

pub struct RagStepHandler {
    meta: HandlerMetadata,
    retry: RetryPolicy,
}

impl RagStepHandler {
    pub fn new(priority: i32) -> Self {
        Self {
            meta: HandlerMetadata {
                name: "rag-knowledge".to_string(),
                version: crate::registry::Version::new(1, 0, 0),
                operation: OperationKind::Rag,
                description: "retrieve from the knowledge backend and synthesize".to_string(),
                required_capabilities: Default::default(),
                priority,
            },
            retry: RetryPolicy::default(),
        }
    }
}

#[async_trait]
impl StepHandler for RagStepHandler {
    fn metadata(&self) -> &HandlerMetadata {
        &self.meta
    }

    fn idempotent(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &ExecutionContext) -> HubResult<HandlerOutput> {
        let input = ctx.input();
        let query = payload_text(&input, &["query", "question"]).ok_or_else(|| {
            HubError::new(ErrorCode::RagQueryFailed, "rag input has no query or question")
        })?;
        let context_ids: Vec<String> = input
            .payload
            .get("context_ids")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let top_k = input
            .payload
            .get("top_k")
            .and_then(Value::as_u64)
            .unwrap_or(5) as usize;

        let step = ctx
            .add_step(
                StepKind::KnowledgeQuery,
                "knowledge-query",
                json!({ "query": query, "context_ids": context_ids, "top_k": top_k }),
            )
            .await?;
        let hits = if step.replayed {
            step.step
                .output
                .clone()
                .unwrap_or_else(|| json!([]))
        } else {
            let token = ctx.cancellation();
            let knowledge = ctx.knowledge().clone();
            // retryable backend errors are retried here; the rest bubble up
            let result = tokio::select! {
                out = retry_with(self.retry, |_| {
                    let knowledge = knowledge.clone();
                    let query = query.clone();
                    let context_ids = context_ids.clone();
                    async move { knowledge.query(&query, &context_ids, top_k).await }
                }) => out,
                _ = token.cancelled() => {
                    Err(HubError::new(ErrorCode::RunCancelled, "knowledge query aborted"))
                }
            };
            match result {
                Ok(hits) => {
                    let value = serde_json::to_value(&hits)
                        .map_err(|e| HubError::internal(e.to_string()))?;
                    ctx.complete_step(&step.step.step_id, Ok(value.clone())).await?;
                    value
                }
                Err(err) => {
                    ctx.complete_step(&step.step.step_id, Err(&err)).await?;
                    return Err(err);
                }
            }
        };

        let empty = Vec::new();
        let hit_list = hits.as_array().unwrap_or(&empty);
        let response = if hit_list.is_empty() {
            format!("No knowledge found for: {query}")
        } else {
            let lines: Vec<String> = hit_list
                .iter()
                .filter_map(|h| h.get("content").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            lines.join("\n")
        };
        Ok(HandlerOutput {
            response: Some(response),
            data: Some(hits),
            artifacts: Vec::new(),
        })
    }
}
