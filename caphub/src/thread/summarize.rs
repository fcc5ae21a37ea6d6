//! Summarization seam for thread compaction.
//!
//! The hub only needs *a* summary producer; the default is extractive and
//! deterministic. An LLM-backed implementation can be swapped in through
//! [`Summarizer`] without touching the store.

use async_trait::async_trait;

use crate::error::HubResult;
use crate::thread::ThreadMessage;

/// When and how much to compact: summarize once the log exceeds `threshold`
/// messages, always leaving the newest `keep_tail` messages intact.
#[derive(Clone, Copy, Debug)]
pub struct SummarizePolicy {
    pub threshold: usize,
    pub keep_tail: usize,
}

impl Default for SummarizePolicy {
    fn default() -> Self {
        Self {
            threshold: 50,
            keep_tail: 10,
        }
    }
}

/// Produces the summary text for a log prefix.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[ThreadMessage]) -> HubResult<String>;
}

/// Deterministic fallback: first line of each message, truncated.
pub struct ExtractiveSummarizer {
    pub max_chars_per_message: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self {
            max_chars_per_message: 120,
        }
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, messages: &[ThreadMessage]) -> HubResult<String> {
        let mut lines = Vec::with_capacity(messages.len());
        for message in messages {
            let role = match message.role {
                crate::thread::MessageRole::User => "user",
                crate::thread::MessageRole::Assistant => "assistant",
                crate::thread::MessageRole::System => "system",
                crate::thread::MessageRole::Tool => "tool",
            };
            let first_line = message.content.lines().next().unwrap_or("");
            let mut line = format!("{role}: {first_line}");
            if line.chars().count() > self.max_chars_per_message {
                line = line.chars().take(self.max_chars_per_message).collect::<String>() + "…";
            }
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }
}
