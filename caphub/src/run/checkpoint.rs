//! Checkpoint store: durable run snapshots for restart recovery.
//!
//! A snapshot is written on every state transition and at the checkpoint
//! cadence while a handler executes. On restart, non-terminal snapshots are
//! re-enqueued and replayed after the last completed step.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{HubError, HubResult};
use crate::llm::LlmUsage;
use crate::run::{Run, RunStatus};

/// Durable image of one run: the record itself plus executor-side cursors.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run: Run,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_handler: Option<String>,
    #[serde(default)]
    pub token_usage: LlmUsage,
    /// Highest thread sequence already folded into the run's context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_cursor: Option<u64>,
    /// Delivery attempt; grows on queue redelivery.
    #[serde(default)]
    pub attempt: u32,
    /// Enveloped terminal event as published, kept for stream replay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_event: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl RunSnapshot {
    pub fn new(run: Run) -> Self {
        Self {
            run,
            current_handler: None,
            token_usage: LlmUsage::default(),
            thread_cursor: None,
            attempt: 0,
            terminal_event: None,
            updated_at: Utc::now(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    pub fn status(&self) -> RunStatus {
        self.run.status
    }
}

/// Durable key → snapshot mapping.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn put(&self, snapshot: &RunSnapshot) -> HubResult<()>;
    async fn get(&self, run_id: &str) -> HubResult<Option<RunSnapshot>>;
    /// Snapshots whose run status is non-terminal, oldest first.
    async fn list_resumable(&self) -> HubResult<Vec<RunSnapshot>>;
    async fn delete(&self, run_id: &str) -> HubResult<()>;
}

/// In-memory checkpoint store for local mode and tests.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    snapshots: DashMap<String, RunSnapshot>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, snapshot: &RunSnapshot) -> HubResult<()> {
        self.snapshots
            .insert(snapshot.run_id().to_string(), snapshot.clone());
        Ok(())
    }

    async fn get(&self, run_id: &str) -> HubResult<Option<RunSnapshot>> {
        Ok(self.snapshots.get(run_id).map(|s| s.clone()))
    }

    async fn list_resumable(&self) -> HubResult<Vec<RunSnapshot>> {
        let mut out: Vec<RunSnapshot> = self
            .snapshots
            .iter()
            .filter(|s| !s.status().is_terminal())
            .map(|s| s.clone())
            .collect();
        out.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(out)
    }

    async fn delete(&self, run_id: &str) -> HubResult<()> {
        self.snapshots.remove(run_id);
        Ok(())
    }
}

/// SQLite-backed checkpoint store: one row per run, JSON payload.
/// Persistent across process restarts.
pub struct SqliteCheckpointStore {
    db: Arc<Mutex<Connection>>,
}

fn storage_err(e: impl std::fmt::Display) -> HubError {
    HubError::storage(e.to_string())
}

impl SqliteCheckpointStore {
    pub fn new(path: impl AsRef<Path>) -> HubResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(storage_err)?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS run_checkpoints (
                run_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            [],
        )
        .map_err(storage_err)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_run_checkpoints_status ON run_checkpoints(status)",
            [],
        )
        .map_err(storage_err)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T: Send + 'static>(
        &self,
        f: impl FnOnce(&Connection) -> HubResult<T> + Send + 'static,
    ) -> HubResult<T> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().unwrap_or_else(|p| p.into_inner());
            f(&conn)
        })
        .await
        .map_err(storage_err)?
    }
}

const TERMINAL_STATUSES: &str = "('completed','failed','cancelled','timeout')";

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn put(&self, snapshot: &RunSnapshot) -> HubResult<()> {
        let run_id = snapshot.run_id().to_string();
        let status = snapshot.status().as_str().to_string();
        let payload = serde_json::to_string(snapshot).map_err(storage_err)?;
        let updated_at = snapshot.updated_at.timestamp_millis();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO run_checkpoints (run_id, status, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(run_id) DO UPDATE SET
                     status = excluded.status,
                     payload = excluded.payload,
                     updated_at = excluded.updated_at",
                params![run_id, status, payload, updated_at],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, run_id: &str) -> HubResult<Option<RunSnapshot>> {
        let run_id = run_id.to_string();
        self.blocking(move |conn| {
            let payload: Option<String> = conn
                .query_row(
                    "SELECT payload FROM run_checkpoints WHERE run_id = ?1",
                    params![run_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err)?;
            payload
                .map(|p| serde_json::from_str(&p).map_err(storage_err))
                .transpose()
        })
        .await
    }

    async fn list_resumable(&self) -> HubResult<Vec<RunSnapshot>> {
        self.blocking(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT payload FROM run_checkpoints
                     WHERE status NOT IN {TERMINAL_STATUSES}
                     ORDER BY updated_at ASC"
                ))
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(storage_err)?;
            let mut out = Vec::new();
            for row in rows {
                let payload = row.map_err(storage_err)?;
                out.push(serde_json::from_str(&payload).map_err(storage_err)?);
            }
            Ok(out)
        })
        .await
    }

    async fn delete(&self, run_id: &str) -> HubResult<()> {
        let run_id = run_id.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "DELETE FROM run_checkpoints WHERE run_id = ?1",
                params![run_id],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{RunInput, RunOptions};
    use tempfile::NamedTempFile;

    fn snapshot(status: RunStatus) -> RunSnapshot {
        let mut run = Run::new(RunInput {
            agent_id: "billing".into(),
            thread_id: None,
            messages: vec![],
            operation: None,
            payload: Default::default(),
            options: RunOptions::default(),
        });
        run.status = status;
        RunSnapshot::new(run)
    }

    #[tokio::test]
    async fn memory_round_trip_and_resumable_filter() {
        let store = MemoryCheckpointStore::new();
        let active = snapshot(RunStatus::Running);
        let done = snapshot(RunStatus::Completed);
        store.put(&active).await.unwrap();
        store.put(&done).await.unwrap();

        let got = store.get(active.run_id()).await.unwrap().unwrap();
        assert_eq!(got.status(), RunStatus::Running);

        let resumable = store.list_resumable().await.unwrap();
        assert_eq!(resumable.len(), 1);
        assert_eq!(resumable[0].run_id(), active.run_id());

        store.delete(active.run_id()).await.unwrap();
        assert!(store.get(active.run_id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sqlite_snapshots_survive_reopen() {
        let file = NamedTempFile::new().unwrap();
        let interrupted = snapshot(RunStatus::Interrupted);
        let failed = snapshot(RunStatus::Failed);
        {
            let store = SqliteCheckpointStore::new(file.path()).unwrap();
            store.put(&interrupted).await.unwrap();
            store.put(&failed).await.unwrap();
        }
        let store = SqliteCheckpointStore::new(file.path()).unwrap();
        let resumable = store.list_resumable().await.unwrap();
        assert_eq!(resumable.len(), 1);
        assert_eq!(resumable[0].run_id(), interrupted.run_id());
        assert!(store.get(failed.run_id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sqlite_put_overwrites_status() {
        let file = NamedTempFile::new().unwrap();
        let store = SqliteCheckpointStore::new(file.path()).unwrap();
        let mut snap = snapshot(RunStatus::Running);
        store.put(&snap).await.unwrap();
        snap.run.status = RunStatus::Completed;
        snap.updated_at = Utc::now();
        store.put(&snap).await.unwrap();
        assert!(store.list_resumable().await.unwrap().is_empty());
        assert_eq!(
            store.get(snap.run_id()).await.unwrap().unwrap().status(),
            RunStatus::Completed
        );
    }
}
