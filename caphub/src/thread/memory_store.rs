//! In-memory thread store: the local-mode default and the test double.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{HubError, HubResult};
use crate::thread::{
    reject_if_closed, MessageFilter, NewMessage, Thread, ThreadMessage, ThreadStatus, ThreadStore,
    ThreadSummary,
};

struct ThreadRecord {
    thread: Thread,
    messages: Vec<ThreadMessage>,
    by_idempotency_key: HashMap<String, u64>,
}

#[derive(Default)]
pub struct MemoryThreadStore {
    threads: DashMap<String, Mutex<ThreadRecord>>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<T>(
        &self,
        thread_id: &str,
        f: impl FnOnce(&mut ThreadRecord) -> HubResult<T>,
    ) -> HubResult<T> {
        let entry = self
            .threads
            .get(thread_id)
            .ok_or_else(|| HubError::thread_not_found(thread_id))?;
        let mut record = entry.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut record)
    }
}

fn push_message(record: &mut ThreadRecord, message: NewMessage) -> ThreadMessage {
    if let Some(key) = &message.idempotency_key {
        if let Some(&seq) = record.by_idempotency_key.get(key) {
            if let Some(existing) = record.messages.iter().find(|m| m.seq == seq) {
                return existing.clone();
            }
        }
    }
    let seq = record.messages.last().map(|m| m.seq + 1).unwrap_or(1);
    let stored = ThreadMessage {
        seq,
        role: message.role,
        content: message.content,
        metadata: message.metadata,
        created_at: Utc::now(),
    };
    if let Some(key) = message.idempotency_key {
        record.by_idempotency_key.insert(key, seq);
    }
    record.messages.push(stored.clone());
    record.thread.updated_at = Utc::now();
    stored
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn create(
        &self,
        agent_id: &str,
        metadata: BTreeMap<String, Value>,
        initial_messages: Vec<NewMessage>,
    ) -> HubResult<Thread> {
        let now = Utc::now();
        let thread = Thread {
            thread_id: format!("thread-{}", Uuid::new_v4()),
            agent_id: agent_id.to_string(),
            status: ThreadStatus::Active,
            metadata,
            summary: None,
            created_at: now,
            updated_at: now,
        };
        let mut record = ThreadRecord {
            thread: thread.clone(),
            messages: Vec::new(),
            by_idempotency_key: HashMap::new(),
        };
        for message in initial_messages {
            push_message(&mut record, message);
        }
        self.threads
            .insert(thread.thread_id.clone(), Mutex::new(record));
        Ok(thread)
    }

    async fn get(&self, thread_id: &str) -> HubResult<Thread> {
        self.with_record(thread_id, |r| Ok(r.thread.clone()))
    }

    async fn append(&self, thread_id: &str, message: NewMessage) -> HubResult<ThreadMessage> {
        self.with_record(thread_id, |r| {
            reject_if_closed(&r.thread)?;
            Ok(push_message(r, message))
        })
    }

    async fn list_messages(
        &self,
        thread_id: &str,
        filter: &MessageFilter,
    ) -> HubResult<Vec<ThreadMessage>> {
        self.with_record(thread_id, |r| {
            let mut out: Vec<ThreadMessage> = r
                .messages
                .iter()
                .filter(|m| {
                    filter
                        .roles
                        .as_ref()
                        .map(|roles| roles.contains(&m.role))
                        .unwrap_or(true)
                        && filter.after_seq.map(|s| m.seq > s).unwrap_or(true)
                })
                .cloned()
                .collect();
            if filter.reverse {
                out.reverse();
            }
            if let Some(limit) = filter.limit {
                out.truncate(limit);
            }
            Ok(out)
        })
    }

    async fn update_status(&self, thread_id: &str, status: ThreadStatus) -> HubResult<Thread> {
        self.with_record(thread_id, |r| {
            r.thread.status = status;
            r.thread.updated_at = Utc::now();
            Ok(r.thread.clone())
        })
    }

    async fn set_summary(&self, thread_id: &str, summary: ThreadSummary) -> HubResult<Thread> {
        self.with_record(thread_id, |r| {
            r.thread.summary = Some(summary);
            r.thread.updated_at = Utc::now();
            Ok(r.thread.clone())
        })
    }

    async fn update_metadata(
        &self,
        thread_id: &str,
        patch: BTreeMap<String, Value>,
    ) -> HubResult<Thread> {
        self.with_record(thread_id, |r| {
            r.thread.metadata.extend(patch);
            r.thread.updated_at = Utc::now();
            Ok(r.thread.clone())
        })
    }
}
