//! LLM client seam.
//!
//! The language-model provider is an external collaborator; step handlers
//! depend on this trait only. `MockLlm` serves tests and local runs.
//!
//! The trait supports streaming via `invoke_stream()`: when `chunk_tx` is
//! `Some`, implementations send content chunks as they arrive and still
//! return the complete reply at the end. The default implementation calls
//! `invoke()` and emits the full content as one chunk.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{ErrorCode, HubError, HubResult};
use crate::thread::ThreadMessage;

/// Token usage for one LLM call (prompt + completion).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl LlmUsage {
    pub fn add(&mut self, other: LlmUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// One completion: assistant text plus usage when the provider reports it.
#[derive(Clone, Debug)]
pub struct LlmReply {
    pub content: String,
    pub usage: Option<LlmUsage>,
}

/// LLM client: given messages, returns assistant text.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, messages: &[ThreadMessage]) -> HubResult<LlmReply>;

    /// Streaming variant; chunks go to `chunk_tx` when provided.
    async fn invoke_stream(
        &self,
        messages: &[ThreadMessage],
        chunk_tx: Option<mpsc::Sender<String>>,
    ) -> HubResult<LlmReply> {
        let reply = self.invoke(messages).await?;
        if let Some(tx) = chunk_tx {
            let _ = tx.send(reply.content.clone()).await;
        }
        Ok(reply)
    }
}

/// Fixed-reply client for tests and wiring checks.
pub struct MockLlm {
    reply: String,
    delay: Option<Duration>,
    fail_with: Option<ErrorCode>,
}

impl MockLlm {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            delay: None,
            fail_with: None,
        }
    }

    /// Sleeps before answering; lets tests exercise deadlines.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(code: ErrorCode) -> Self {
        Self {
            reply: String::new(),
            delay: None,
            fail_with: Some(code),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(&self, messages: &[ThreadMessage]) -> HubResult<LlmReply> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(code) = self.fail_with {
            return Err(HubError::new(code, "mock llm failure"));
        }
        let prompt_tokens: u32 = messages
            .iter()
            .map(|m| crate::thread::estimate_tokens(&m.content))
            .sum();
        let completion_tokens = crate::thread::estimate_tokens(&self.reply);
        Ok(LlmReply {
            content: self.reply.clone(),
            usage: Some(LlmUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }

    async fn invoke_stream(
        &self,
        messages: &[ThreadMessage],
        chunk_tx: Option<mpsc::Sender<String>>,
    ) -> HubResult<LlmReply> {
        let reply = self.invoke(messages).await?;
        if let Some(tx) = chunk_tx {
            // word-at-a-time so stream consumers see multiple chunks
            for word in reply.content.split_inclusive(' ') {
                if tx.send(word.to_string()).await.is_err() {
                    break;
                }
            }
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::NewMessage;

    fn msgs(content: &str) -> Vec<ThreadMessage> {
        let m = NewMessage::user(content);
        vec![ThreadMessage {
            seq: 1,
            role: m.role,
            content: m.content,
            metadata: m.metadata,
            created_at: chrono::Utc::now(),
        }]
    }

    #[tokio::test]
    async fn mock_returns_fixed_reply_with_usage() {
        let llm = MockLlm::new("hello there");
        let reply = llm.invoke(&msgs("hi")).await.unwrap();
        assert_eq!(reply.content, "hello there");
        let usage = reply.usage.unwrap();
        assert_eq!(usage.total_tokens, usage.prompt_tokens + usage.completion_tokens);
    }

    #[tokio::test]
    async fn mock_failure_propagates_code() {
        let llm = MockLlm::failing(ErrorCode::NetUpstream);
        let err = llm.invoke(&msgs("hi")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NetUpstream);
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn stream_emits_chunks_and_full_reply() {
        let llm = MockLlm::new("a b c");
        let (tx, mut rx) = mpsc::channel(8);
        let reply = llm.invoke_stream(&msgs("hi"), Some(tx)).await.unwrap();
        assert_eq!(reply.content, "a b c");
        let mut collected = String::new();
        while let Some(chunk) = rx.recv().await {
            collected.push_str(&chunk);
        }
        assert_eq!(collected, "a b c");
    }
}
