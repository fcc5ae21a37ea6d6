//! Thread store: append-only conversation logs tied to one agent.
//!
//! Messages are totally ordered by a per-thread sequence and never mutated
//! or deleted in place. Closed and archived threads reject appends.

mod context;
mod memory_store;
mod sqlite_store;
mod summarize;

pub use context::{estimate_tokens, ContextPolicy, ContextStrategy, ContextWindow};
pub use memory_store::MemoryThreadStore;
pub use sqlite_store::SqliteThreadStore;
pub use summarize::{ExtractiveSummarizer, SummarizePolicy, Summarizer};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HubError, HubResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Paused,
    Closed,
    Archived,
}

impl ThreadStatus {
    /// Closed and archived threads reject appends.
    pub fn accepts_appends(self) -> bool {
        matches!(self, ThreadStatus::Active | ThreadStatus::Paused)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

/// Optional per-message annotations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    /// Pinned messages survive summary compaction (decision points).
    #[serde(default)]
    pub pinned: bool,
}

/// A message as stored: sequence, role, content, annotations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub seq: u64,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
}

/// An append request. The idempotency key deduplicates retried appends.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub metadata: MessageMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            metadata: MessageMetadata::default(),
            idempotency_key: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            metadata: MessageMetadata::default(),
            idempotency_key: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            metadata: MessageMetadata::default(),
            idempotency_key: None,
        }
    }
}

/// Versioned summary of the log prefix up to `covers_seq`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub version: u32,
    pub content: String,
    pub covers_seq: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    pub agent_id: String,
    pub status: ThreadStatus,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ThreadSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing filter; defaults to everything in append order.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MessageFilter {
    pub roles: Option<Vec<MessageRole>>,
    pub after_seq: Option<u64>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub reverse: bool,
}

/// Persistence seam for threads and messages. Appends must be atomic: the
/// message is durable and visible, or it is not.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn create(
        &self,
        agent_id: &str,
        metadata: BTreeMap<String, Value>,
        initial_messages: Vec<NewMessage>,
    ) -> HubResult<Thread>;

    async fn get(&self, thread_id: &str) -> HubResult<Thread>;

    async fn append(&self, thread_id: &str, message: NewMessage) -> HubResult<ThreadMessage>;

    async fn list_messages(
        &self,
        thread_id: &str,
        filter: &MessageFilter,
    ) -> HubResult<Vec<ThreadMessage>>;

    async fn update_status(&self, thread_id: &str, status: ThreadStatus) -> HubResult<Thread>;

    async fn set_summary(&self, thread_id: &str, summary: ThreadSummary) -> HubResult<Thread>;

    async fn update_metadata(
        &self,
        thread_id: &str,
        patch: BTreeMap<String, Value>,
    ) -> HubResult<Thread>;
}

/// Thread operations above the persistence seam: close/archive semantics,
/// summarization, context-window assembly.
#[derive(Clone)]
pub struct ThreadService {
    store: Arc<dyn ThreadStore>,
    summarizer: Arc<dyn Summarizer>,
}

impl ThreadService {
    pub fn new(store: Arc<dyn ThreadStore>) -> Self {
        Self {
            store,
            summarizer: Arc::new(ExtractiveSummarizer::default()),
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn store(&self) -> &Arc<dyn ThreadStore> {
        &self.store
    }

    pub async fn create(
        &self,
        agent_id: &str,
        metadata: BTreeMap<String, Value>,
        initial_messages: Vec<NewMessage>,
    ) -> HubResult<Thread> {
        self.store.create(agent_id, metadata, initial_messages).await
    }

    pub async fn get(&self, thread_id: &str) -> HubResult<Thread> {
        self.store.get(thread_id).await
    }

    pub async fn append(&self, thread_id: &str, message: NewMessage) -> HubResult<ThreadMessage> {
        self.store.append(thread_id, message).await
    }

    pub async fn list_messages(
        &self,
        thread_id: &str,
        filter: &MessageFilter,
    ) -> HubResult<Vec<ThreadMessage>> {
        self.store.list_messages(thread_id, filter).await
    }

    pub async fn update_status(&self, thread_id: &str, status: ThreadStatus) -> HubResult<Thread> {
        self.store.update_status(thread_id, status).await
    }

    /// Closes the thread, recording the optional summary/resolution in metadata.
    pub async fn close(
        &self,
        thread_id: &str,
        summary: Option<String>,
        resolution: Option<String>,
    ) -> HubResult<Thread> {
        let mut patch = BTreeMap::new();
        if let Some(summary) = summary {
            patch.insert("close_summary".to_string(), Value::String(summary));
        }
        if let Some(resolution) = resolution {
            patch.insert("resolution".to_string(), Value::String(resolution));
        }
        if !patch.is_empty() {
            self.store.update_metadata(thread_id, patch).await?;
        }
        self.store.update_status(thread_id, ThreadStatus::Closed).await
    }

    pub async fn archive(
        &self,
        thread_id: &str,
        retention_days: Option<u32>,
    ) -> HubResult<Thread> {
        if let Some(days) = retention_days {
            let mut patch = BTreeMap::new();
            patch.insert("retention_days".to_string(), Value::from(days));
            self.store.update_metadata(thread_id, patch).await?;
        }
        self.store
            .update_status(thread_id, ThreadStatus::Archived)
            .await
    }

    /// Re-summarizes the log prefix when it exceeds the policy threshold.
    /// Returns the new summary, or `None` when the log is still small enough.
    /// Re-summarization replaces the previous version.
    pub async fn summarize(
        &self,
        thread_id: &str,
        policy: &SummarizePolicy,
    ) -> HubResult<Option<ThreadSummary>> {
        let thread = self.store.get(thread_id).await?;
        let messages = self
            .store
            .list_messages(thread_id, &MessageFilter::default())
            .await?;
        if messages.len() <= policy.threshold {
            return Ok(None);
        }
        let tail_start = messages.len().saturating_sub(policy.keep_tail);
        let head = &messages[..tail_start];
        if head.is_empty() {
            return Ok(None);
        }
        let covers_seq = head.last().map(|m| m.seq).unwrap_or(0);
        let content = self.summarizer.summarize(head).await?;
        let summary = ThreadSummary {
            version: thread.summary.as_ref().map(|s| s.version + 1).unwrap_or(1),
            content,
            covers_seq,
            created_at: Utc::now(),
        };
        self.store.set_summary(thread_id, summary.clone()).await?;
        Ok(Some(summary))
    }

    /// Assembles the prompt context for an agent under a token budget.
    pub async fn get_context(
        &self,
        thread_id: &str,
        budget_tokens: u32,
        policy: &ContextPolicy,
    ) -> HubResult<ContextWindow> {
        let thread = self.store.get(thread_id).await?;
        let messages = self
            .store
            .list_messages(thread_id, &MessageFilter::default())
            .await?;
        Ok(context::assemble(&thread, messages, budget_tokens, policy))
    }
}

pub(crate) fn reject_if_closed(thread: &Thread) -> HubResult<()> {
    if thread.status.accepts_appends() {
        Ok(())
    } else {
        Err(HubError::thread_closed(&thread.thread_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn service() -> ThreadService {
        ThreadService::new(Arc::new(MemoryThreadStore::new()))
    }

    #[tokio::test]
    async fn create_append_list_in_order() {
        let svc = service();
        let thread = svc
            .create("billing", BTreeMap::new(), vec![NewMessage::system("be terse")])
            .await
            .unwrap();
        svc.append(&thread.thread_id, NewMessage::user("hi")).await.unwrap();
        svc.append(&thread.thread_id, NewMessage::assistant("hello"))
            .await
            .unwrap();

        let msgs = svc
            .list_messages(&thread.thread_id, &MessageFilter::default())
            .await
            .unwrap();
        assert_eq!(msgs.len(), 3);
        let seqs: Vec<u64> = msgs.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(msgs[2].content, "hello");
    }

    #[tokio::test]
    async fn closed_thread_rejects_appends() {
        let svc = service();
        let thread = svc.create("billing", BTreeMap::new(), vec![]).await.unwrap();
        svc.close(&thread.thread_id, Some("done".into()), Some("resolved".into()))
            .await
            .unwrap();
        let err = svc
            .append(&thread.thread_id, NewMessage::user("late"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ThreadClosed);

        let got = svc.get(&thread.thread_id).await.unwrap();
        assert_eq!(got.status, ThreadStatus::Closed);
        assert_eq!(got.metadata["close_summary"], "done");
        assert_eq!(got.metadata["resolution"], "resolved");
    }

    #[tokio::test]
    async fn idempotent_append_appends_exactly_once() {
        let svc = service();
        let thread = svc.create("billing", BTreeMap::new(), vec![]).await.unwrap();
        let mut msg = NewMessage::user("pay invoice 42");
        msg.idempotency_key = Some("req-1".into());
        let first = svc.append(&thread.thread_id, msg.clone()).await.unwrap();
        let second = svc.append(&thread.thread_id, msg).await.unwrap();
        assert_eq!(first.seq, second.seq);
        let msgs = svc
            .list_messages(&thread.thread_id, &MessageFilter::default())
            .await
            .unwrap();
        assert_eq!(msgs.len(), 1);
    }

    #[tokio::test]
    async fn summarize_replaces_versioned_summary() {
        let svc = service();
        let thread = svc.create("billing", BTreeMap::new(), vec![]).await.unwrap();
        for i in 0..8 {
            svc.append(&thread.thread_id, NewMessage::user(format!("message {i}")))
                .await
                .unwrap();
        }
        let policy = SummarizePolicy {
            threshold: 4,
            keep_tail: 2,
        };
        let s1 = svc.summarize(&thread.thread_id, &policy).await.unwrap().unwrap();
        assert_eq!(s1.version, 1);
        assert_eq!(s1.covers_seq, 6);

        svc.append(&thread.thread_id, NewMessage::user("message 8"))
            .await
            .unwrap();
        let s2 = svc.summarize(&thread.thread_id, &policy).await.unwrap().unwrap();
        assert_eq!(s2.version, 2);
        assert_eq!(s2.covers_seq, 7);
    }

    #[tokio::test]
    async fn summarize_below_threshold_is_none() {
        let svc = service();
        let thread = svc.create("billing", BTreeMap::new(), vec![]).await.unwrap();
        svc.append(&thread.thread_id, NewMessage::user("only one"))
            .await
            .unwrap();
        let out = svc
            .summarize(
                &thread.thread_id,
                &SummarizePolicy {
                    threshold: 10,
                    keep_tail: 2,
                },
            )
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn missing_thread_is_not_found() {
        let svc = service();
        let err = svc.get("thread-none").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ThreadNotFound);
    }
}
