//! Work queue: run dispatch with lease-based claims.
//!
//! `LocalQueue` is the in-process FIFO used in local mode. It keeps the
//! distributed contract shape (enqueue / claim-with-lease / ack / nack plus
//! a lease sweeper) so a remote at-least-once queue can be dropped in;
//! checkpoint-based idempotency makes redelivery safe either way.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::HubResult;

/// One unit of dispatch, keyed by run id.
#[derive(Clone, Debug)]
pub struct QueueJob {
    pub job_id: String,
    pub run_id: String,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueJob {
    pub fn for_run(run_id: impl Into<String>) -> Self {
        Self {
            job_id: format!("job-{}", Uuid::new_v4()),
            run_id: run_id.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// A claimed job with its lease.
#[derive(Clone, Debug)]
pub struct QueueClaim {
    pub job: QueueJob,
    pub claim_id: String,
    pub lease_until: Instant,
}

/// Queue contract: at-least-once with acknowledge/requeue.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, job: QueueJob) -> HubResult<()>;

    /// Waits for a job and claims it under a lease. Cancel-safe: dropping the
    /// future before completion claims nothing.
    async fn claim(&self, lease: Duration) -> QueueClaim;

    /// Completes the job; the claim is consumed.
    async fn ack(&self, claim: &QueueClaim) -> HubResult<()>;

    /// Returns the job to the queue for redelivery.
    async fn nack(&self, claim: &QueueClaim) -> HubResult<()>;

    fn depth(&self) -> usize;
}

struct LocalQueueState {
    ready: VecDeque<QueueJob>,
    leased: HashMap<String, QueueClaim>,
}

/// In-process FIFO with lease bookkeeping.
pub struct LocalQueue {
    state: Mutex<LocalQueueState>,
    notify: Notify,
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LocalQueueState {
                ready: VecDeque::new(),
                leased: HashMap::new(),
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LocalQueueState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Returns leases held past their deadline to the ready queue.
    pub fn sweep_expired_leases(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let expired: Vec<String> = state
            .leased
            .iter()
            .filter(|(_, claim)| claim.lease_until <= now)
            .map(|(id, _)| id.clone())
            .collect();
        let count = expired.len();
        for claim_id in expired {
            if let Some(claim) = state.leased.remove(&claim_id) {
                tracing::warn!(run_id = %claim.job.run_id, "queue lease expired, requeueing");
                state.ready.push_back(claim.job);
            }
        }
        drop(state);
        for _ in 0..count {
            self.notify.notify_one();
        }
        count
    }

    /// Background lease sweeper at a fixed cadence.
    pub fn spawn_lease_sweeper(
        self: &std::sync::Arc<Self>,
        cadence: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        queue.sweep_expired_leases();
                    }
                }
            }
        })
    }
}

#[async_trait]
impl WorkQueue for LocalQueue {
    async fn enqueue(&self, job: QueueJob) -> HubResult<()> {
        self.lock().ready.push_back(job);
        self.notify.notify_one();
        Ok(())
    }

    async fn claim(&self, lease: Duration) -> QueueClaim {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if let Some(job) = state.ready.pop_front() {
                    let claim = QueueClaim {
                        job,
                        claim_id: format!("claim-{}", Uuid::new_v4()),
                        lease_until: Instant::now() + lease,
                    };
                    state.leased.insert(claim.claim_id.clone(), claim.clone());
                    return claim;
                }
            }
            notified.await;
        }
    }

    async fn ack(&self, claim: &QueueClaim) -> HubResult<()> {
        self.lock().leased.remove(&claim.claim_id);
        Ok(())
    }

    async fn nack(&self, claim: &QueueClaim) -> HubResult<()> {
        let mut state = self.lock();
        if let Some(claim) = state.leased.remove(&claim.claim_id) {
            state.ready.push_back(claim.job);
            drop(state);
            self.notify.notify_one();
        }
        Ok(())
    }

    fn depth(&self) -> usize {
        self.lock().ready.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn fifo_claim_and_ack() {
        let q = LocalQueue::new();
        q.enqueue(QueueJob::for_run("run-1")).await.unwrap();
        q.enqueue(QueueJob::for_run("run-2")).await.unwrap();
        assert_eq!(q.depth(), 2);

        let first = q.claim(Duration::from_secs(30)).await;
        assert_eq!(first.job.run_id, "run-1");
        let second = q.claim(Duration::from_secs(30)).await;
        assert_eq!(second.job.run_id, "run-2");
        assert_eq!(q.depth(), 0);

        q.ack(&first).await.unwrap();
        q.ack(&second).await.unwrap();
        assert_eq!(q.sweep_expired_leases(), 0);
    }

    #[tokio::test]
    async fn nack_requeues_for_redelivery() {
        let q = LocalQueue::new();
        q.enqueue(QueueJob::for_run("run-1")).await.unwrap();
        let claim = q.claim(Duration::from_secs(30)).await;
        q.nack(&claim).await.unwrap();
        let again = q.claim(Duration::from_secs(30)).await;
        assert_eq!(again.job.run_id, "run-1");
    }

    #[tokio::test]
    async fn expired_lease_is_swept_back() {
        let q = LocalQueue::new();
        q.enqueue(QueueJob::for_run("run-1")).await.unwrap();
        let _abandoned = q.claim(Duration::from_millis(0)).await;
        assert_eq!(q.depth(), 0);
        assert_eq!(q.sweep_expired_leases(), 1);
        assert_eq!(q.depth(), 1);
    }

    #[tokio::test]
    async fn claim_waits_for_enqueue() {
        let q = Arc::new(LocalQueue::new());
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.claim(Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        q.enqueue(QueueJob::for_run("run-late")).await.unwrap();
        let claim = waiter.await.unwrap();
        assert_eq!(claim.job.run_id, "run-late");
    }
}
