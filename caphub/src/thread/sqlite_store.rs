//! SQLite-backed thread store. Persistent per-thread message history.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{HubError, HubResult};
use crate::thread::{
    MessageFilter, MessageMetadata, MessageRole, NewMessage, Thread, ThreadMessage, ThreadStatus,
    ThreadStore, ThreadSummary,
};

/// SQLite store: `threads` plus an append-only `messages` table whose
/// per-thread `seq` is assigned inside the append transaction.
pub struct SqliteThreadStore {
    db: Arc<Mutex<Connection>>,
}

fn storage_err(e: impl std::fmt::Display) -> HubError {
    HubError::storage(e.to_string())
}

fn role_to_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
        MessageRole::Tool => "tool",
    }
}

fn role_from_str(s: &str) -> MessageRole {
    match s {
        "assistant" => MessageRole::Assistant,
        "system" => MessageRole::System,
        "tool" => MessageRole::Tool,
        _ => MessageRole::User,
    }
}

fn status_to_str(status: ThreadStatus) -> &'static str {
    match status {
        ThreadStatus::Active => "active",
        ThreadStatus::Paused => "paused",
        ThreadStatus::Closed => "closed",
        ThreadStatus::Archived => "archived",
    }
}

fn status_from_str(s: &str) -> ThreadStatus {
    match s {
        "paused" => ThreadStatus::Paused,
        "closed" => ThreadStatus::Closed,
        "archived" => ThreadStatus::Archived,
        _ => ThreadStatus::Active,
    }
}

fn ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_ms(v: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(v).single().unwrap_or_else(Utc::now)
}

impl SqliteThreadStore {
    /// Opens or creates the database and tables.
    pub fn new(path: impl AsRef<Path>) -> HubResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(storage_err)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                thread_id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                status TEXT NOT NULL,
                metadata TEXT NOT NULL,
                summary TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                idempotency_key TEXT,
                created_at INTEGER NOT NULL,
                UNIQUE (thread_id, seq),
                FOREIGN KEY (thread_id) REFERENCES threads(thread_id)
            );
            CREATE INDEX IF NOT EXISTS idx_messages_thread_id ON messages(thread_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_idempotency
                ON messages(thread_id, idempotency_key)
                WHERE idempotency_key IS NOT NULL;
            "#,
        )
        .map_err(storage_err)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T: Send + 'static>(
        &self,
        f: impl FnOnce(&mut Connection) -> HubResult<T> + Send + 'static,
    ) -> HubResult<T> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.lock().unwrap_or_else(|p| p.into_inner());
            f(&mut conn)
        })
        .await
        .map_err(storage_err)?
    }
}

fn read_thread(conn: &Connection, thread_id: &str) -> HubResult<Thread> {
    conn.query_row(
        "SELECT thread_id, agent_id, status, metadata, summary, created_at, updated_at
         FROM threads WHERE thread_id = ?1",
        params![thread_id],
        row_to_thread,
    )
    .optional()
    .map_err(storage_err)?
    .ok_or_else(|| HubError::thread_not_found(thread_id))
}

fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<Thread> {
    let metadata: String = row.get(3)?;
    let summary: Option<String> = row.get(4)?;
    Ok(Thread {
        thread_id: row.get(0)?,
        agent_id: row.get(1)?,
        status: status_from_str(&row.get::<_, String>(2)?),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        summary: summary.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: from_ms(row.get(5)?),
        updated_at: from_ms(row.get(6)?),
    })
}

fn insert_message(
    conn: &Connection,
    thread_id: &str,
    message: &NewMessage,
) -> HubResult<ThreadMessage> {
    if let Some(key) = &message.idempotency_key {
        let existing = conn
            .query_row(
                "SELECT seq, role, content, metadata, created_at FROM messages
                 WHERE thread_id = ?1 AND idempotency_key = ?2",
                params![thread_id, key],
                row_to_message,
            )
            .optional()
            .map_err(storage_err)?;
        if let Some(found) = existing {
            return Ok(found);
        }
    }
    let next_seq: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE thread_id = ?1",
            params![thread_id],
            |row| row.get(0),
        )
        .map_err(storage_err)?;
    let now = Utc::now();
    let metadata = serde_json::to_string(&message.metadata).map_err(storage_err)?;
    conn.execute(
        "INSERT INTO messages (thread_id, seq, role, content, metadata, idempotency_key, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            thread_id,
            next_seq,
            role_to_str(message.role),
            message.content,
            metadata,
            message.idempotency_key,
            ms(now)
        ],
    )
    .map_err(storage_err)?;
    conn.execute(
        "UPDATE threads SET updated_at = ?2 WHERE thread_id = ?1",
        params![thread_id, ms(now)],
    )
    .map_err(storage_err)?;
    Ok(ThreadMessage {
        seq: next_seq as u64,
        role: message.role,
        content: message.content.clone(),
        metadata: message.metadata.clone(),
        created_at: now,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadMessage> {
    let seq: i64 = row.get(0)?;
    let metadata: String = row.get(3)?;
    Ok(ThreadMessage {
        seq: seq as u64,
        role: role_from_str(&row.get::<_, String>(1)?),
        content: row.get(2)?,
        metadata: serde_json::from_str::<MessageMetadata>(&metadata).unwrap_or_default(),
        created_at: from_ms(row.get(4)?),
    })
}

#[async_trait]
impl ThreadStore for SqliteThreadStore {
    async fn create(
        &self,
        agent_id: &str,
        metadata: BTreeMap<String, Value>,
        initial_messages: Vec<NewMessage>,
    ) -> HubResult<Thread> {
        let agent_id = agent_id.to_string();
        self.blocking(move |conn| {
            let tx = conn.transaction().map_err(storage_err)?;
            let now = Utc::now();
            let thread = Thread {
                thread_id: format!("thread-{}", Uuid::new_v4()),
                agent_id,
                status: ThreadStatus::Active,
                metadata,
                summary: None,
                created_at: now,
                updated_at: now,
            };
            tx.execute(
                "INSERT INTO threads (thread_id, agent_id, status, metadata, summary, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)",
                params![
                    thread.thread_id,
                    thread.agent_id,
                    status_to_str(thread.status),
                    serde_json::to_string(&thread.metadata).map_err(storage_err)?,
                    ms(now),
                    ms(now)
                ],
            )
            .map_err(storage_err)?;
            for message in &initial_messages {
                insert_message(&tx, &thread.thread_id, message)?;
            }
            tx.commit().map_err(storage_err)?;
            Ok(thread)
        })
        .await
    }

    async fn get(&self, thread_id: &str) -> HubResult<Thread> {
        let thread_id = thread_id.to_string();
        self.blocking(move |conn| read_thread(conn, &thread_id)).await
    }

    async fn append(&self, thread_id: &str, message: NewMessage) -> HubResult<ThreadMessage> {
        let thread_id = thread_id.to_string();
        self.blocking(move |conn| {
            let tx = conn.transaction().map_err(storage_err)?;
            let thread = read_thread(&tx, &thread_id)?;
            super::reject_if_closed(&thread)?;
            let stored = insert_message(&tx, &thread_id, &message)?;
            tx.commit().map_err(storage_err)?;
            Ok(stored)
        })
        .await
    }

    async fn list_messages(
        &self,
        thread_id: &str,
        filter: &MessageFilter,
    ) -> HubResult<Vec<ThreadMessage>> {
        let thread_id = thread_id.to_string();
        let filter = filter.clone();
        self.blocking(move |conn| {
            read_thread(conn, &thread_id)?;
            let mut stmt = conn
                .prepare(
                    "SELECT seq, role, content, metadata, created_at FROM messages
                     WHERE thread_id = ?1 AND seq > ?2 ORDER BY seq ASC",
                )
                .map_err(storage_err)?;
            let after = filter.after_seq.unwrap_or(0) as i64;
            let rows = stmt
                .query_map(params![thread_id, after], row_to_message)
                .map_err(storage_err)?;
            let mut out = Vec::new();
            for row in rows {
                let message = row.map_err(storage_err)?;
                let role_ok = filter
                    .roles
                    .as_ref()
                    .map(|roles| roles.contains(&message.role))
                    .unwrap_or(true);
                if role_ok {
                    out.push(message);
                }
            }
            if filter.reverse {
                out.reverse();
            }
            if let Some(limit) = filter.limit {
                out.truncate(limit);
            }
            Ok(out)
        })
        .await
    }

    async fn update_status(&self, thread_id: &str, status: ThreadStatus) -> HubResult<Thread> {
        let thread_id = thread_id.to_string();
        self.blocking(move |conn| {
            let mut thread = read_thread(conn, &thread_id)?;
            thread.status = status;
            thread.updated_at = Utc::now();
            conn.execute(
                "UPDATE threads SET status = ?2, updated_at = ?3 WHERE thread_id = ?1",
                params![thread_id, status_to_str(status), ms(thread.updated_at)],
            )
            .map_err(storage_err)?;
            Ok(thread)
        })
        .await
    }

    async fn set_summary(&self, thread_id: &str, summary: ThreadSummary) -> HubResult<Thread> {
        let thread_id = thread_id.to_string();
        self.blocking(move |conn| {
            let mut thread = read_thread(conn, &thread_id)?;
            let encoded = serde_json::to_string(&summary).map_err(storage_err)?;
            thread.summary = Some(summary);
            thread.updated_at = Utc::now();
            conn.execute(
                "UPDATE threads SET summary = ?2, updated_at = ?3 WHERE thread_id = ?1",
                params![thread_id, encoded, ms(thread.updated_at)],
            )
            .map_err(storage_err)?;
            Ok(thread)
        })
        .await
    }

    async fn update_metadata(
        &self,
        thread_id: &str,
        patch: BTreeMap<String, Value>,
    ) -> HubResult<Thread> {
        let thread_id = thread_id.to_string();
        self.blocking(move |conn| {
            let mut thread = read_thread(conn, &thread_id)?;
            thread.metadata.extend(patch);
            thread.updated_at = Utc::now();
            conn.execute(
                "UPDATE threads SET metadata = ?2, updated_at = ?3 WHERE thread_id = ?1",
                params![
                    thread_id,
                    serde_json::to_string(&thread.metadata).map_err(storage_err)?,
                    ms(thread.updated_at)
                ],
            )
            .map_err(storage_err)?;
            Ok(thread)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn append_and_list_order_survive_reopen() {
        let file = NamedTempFile::new().unwrap();
        let thread_id;
        {
            let store = SqliteThreadStore::new(file.path()).unwrap();
            let thread = store.create("billing", BTreeMap::new(), vec![]).await.unwrap();
            thread_id = thread.thread_id.clone();
            store.append(&thread_id, NewMessage::user("hi")).await.unwrap();
            store
                .append(&thread_id, NewMessage::assistant("hello"))
                .await
                .unwrap();
        }
        let reopened = SqliteThreadStore::new(file.path()).unwrap();
        let msgs = reopened
            .list_messages(&thread_id, &MessageFilter::default())
            .await
            .unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].seq, 1);
        assert_eq!(msgs[0].content, "hi");
        assert_eq!(msgs[1].seq, 2);
    }

    #[tokio::test]
    async fn closed_thread_rejects_append() {
        let file = NamedTempFile::new().unwrap();
        let store = SqliteThreadStore::new(file.path()).unwrap();
        let thread = store.create("billing", BTreeMap::new(), vec![]).await.unwrap();
        store
            .update_status(&thread.thread_id, ThreadStatus::Closed)
            .await
            .unwrap();
        let err = store
            .append(&thread.thread_id, NewMessage::user("late"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ThreadClosed);
    }

    #[tokio::test]
    async fn idempotency_key_dedupes() {
        let file = NamedTempFile::new().unwrap();
        let store = SqliteThreadStore::new(file.path()).unwrap();
        let thread = store.create("billing", BTreeMap::new(), vec![]).await.unwrap();
        let mut msg = NewMessage::user("once");
        msg.idempotency_key = Some("key-1".into());
        let a = store.append(&thread.thread_id, msg.clone()).await.unwrap();
        let b = store.append(&thread.thread_id, msg).await.unwrap();
        assert_eq!(a.seq, b.seq);
        let msgs = store
            .list_messages(&thread.thread_id, &MessageFilter::default())
            .await
            .unwrap();
        assert_eq!(msgs.len(), 1);
    }

    #[tokio::test]
    async fn summary_round_trips() {
        let file = NamedTempFile::new().unwrap();
        let store = SqliteThreadStore::new(file.path()).unwrap();
        let thread = store.create("billing", BTreeMap::new(), vec![]).await.unwrap();
        store
            .set_summary(
                &thread.thread_id,
                ThreadSummary {
                    version: 1,
                    content: "talked about invoices".into(),
                    covers_seq: 4,
                    created_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        let got = store.get(&thread.thread_id).await.unwrap();
        let summary = got.summary.unwrap();
        assert_eq!(summary.version, 1);
        assert_eq!(summary.covers_seq, 4);
    }

    #[tokio::test]
    async fn metadata_patch_merges() {
        let file = NamedTempFile::new().unwrap();
        let store = SqliteThreadStore::new(file.path()).unwrap();
        let mut meta = BTreeMap::new();
        meta.insert("user_id".to_string(), Value::from("u-1"));
        let thread = store.create("billing", meta, vec![]).await.unwrap();
        let mut patch = BTreeMap::new();
        patch.insert("session_id".to_string(), Value::from("s-9"));
        let updated = store.update_metadata(&thread.thread_id, patch).await.unwrap();
        assert_eq!(updated.metadata["user_id"], "u-1");
        assert_eq!(updated.metadata["session_id"], "s-9");
    }
}
