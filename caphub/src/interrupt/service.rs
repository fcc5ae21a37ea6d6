//! Interrupt lifecycle: create, notify, view, resolve, expire, cancel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ErrorCode, HubError, HubResult};
use crate::interrupt::{Interrupt, InterruptFilter, InterruptSpec, InterruptStatus};

/// How a suspension ended, delivered over the resume channel.
#[derive(Debug)]
pub enum InterruptOutcome {
    Resolved(Value),
    Expired,
    Cancelled,
}

struct ServiceInner {
    interrupts: DashMap<String, Interrupt>,
    /// run_id -> interrupt_id with a non-terminal status (at most one).
    open_by_run: DashMap<String, String>,
    waiters: DashMap<String, oneshot::Sender<InterruptOutcome>>,
}

/// Owns interrupt records and the resume channels back into the executor.
#[derive(Clone)]
pub struct InterruptService {
    inner: Arc<ServiceInner>,
}

impl Default for InterruptService {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptService {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                interrupts: DashMap::new(),
                open_by_run: DashMap::new(),
                waiters: DashMap::new(),
            }),
        }
    }

    /// Stores a pending interrupt and hands back the resume channel the
    /// suspended handler awaits. Conflict when the run already has an open
    /// interrupt.
    pub fn create(
        &self,
        spec: InterruptSpec,
    ) -> HubResult<(Interrupt, oneshot::Receiver<InterruptOutcome>)> {
        let interrupt_id = format!("int-{}", Uuid::new_v4());
        match self.inner.open_by_run.entry(spec.run_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(open) => {
                return Err(HubError::new(
                    ErrorCode::InterruptConflict,
                    format!("run {} already has open interrupt {}", spec.run_id, open.get()),
                ))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(interrupt_id.clone());
            }
        }
        let now = Utc::now();
        let interrupt = Interrupt {
            interrupt_id: interrupt_id.clone(),
            run_id: spec.run_id,
            thread_id: spec.thread_id,
            agent_id: spec.agent_id,
            kind: spec.kind,
            priority: spec.priority,
            status: InterruptStatus::Pending,
            payload: spec.payload,
            response: None,
            timeout_ms: spec.timeout_ms,
            created_at: now,
            expires_at: now + ChronoDuration::milliseconds(spec.timeout_ms as i64),
            resolved_at: None,
        };
        let (tx, rx) = oneshot::channel();
        self.inner.waiters.insert(interrupt_id.clone(), tx);
        self.inner.interrupts.insert(interrupt_id, interrupt.clone());
        Ok((interrupt, rx))
    }

    pub fn get(&self, interrupt_id: &str) -> HubResult<Interrupt> {
        self.inner
            .interrupts
            .get(interrupt_id)
            .map(|i| i.clone())
            .ok_or_else(|| HubError::interrupt_not_found(interrupt_id))
    }

    pub fn list(&self, filter: &InterruptFilter) -> Vec<Interrupt> {
        let mut out: Vec<Interrupt> = self
            .inner
            .interrupts
            .iter()
            .filter(|i| filter.matches(i))
            .map(|i| i.clone())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        out
    }

    /// Delivery acknowledgement: pending → notified. Optional in the protocol.
    pub fn notify(&self, interrupt_id: &str) -> HubResult<Interrupt> {
        self.advance(interrupt_id, InterruptStatus::Pending, InterruptStatus::Notified)
    }

    /// Viewing acknowledgement: pending|notified → viewed. Optional.
    pub fn view(&self, interrupt_id: &str) -> HubResult<Interrupt> {
        let mut entry = self
            .inner
            .interrupts
            .get_mut(interrupt_id)
            .ok_or_else(|| HubError::interrupt_not_found(interrupt_id))?;
        if entry.status.is_terminal() {
            return Err(self.terminal_error(&entry));
        }
        entry.status = InterruptStatus::Viewed;
        Ok(entry.clone())
    }

    /// Writes the response and signals the executor to resume. Exactly one
    /// resolution wins; competing calls fail with a conflict.
    pub fn resolve(&self, interrupt_id: &str, response: Value) -> HubResult<Interrupt> {
        let interrupt = {
            let mut entry = self
                .inner
                .interrupts
                .get_mut(interrupt_id)
                .ok_or_else(|| HubError::interrupt_not_found(interrupt_id))?;
            if entry.status.is_terminal() {
                return Err(self.terminal_error(&entry));
            }
            entry.status = InterruptStatus::Resolved;
            entry.response = Some(response.clone());
            entry.resolved_at = Some(Utc::now());
            entry.clone()
        };
        self.inner.open_by_run.remove(&interrupt.run_id);
        if let Some((_, waiter)) = self.inner.waiters.remove(interrupt_id) {
            let _ = waiter.send(InterruptOutcome::Resolved(response));
        }
        Ok(interrupt)
    }

    /// Marks the interrupt expired and signals the executor.
    pub fn expire(&self, interrupt_id: &str) -> HubResult<Interrupt> {
        let interrupt = {
            let mut entry = self
                .inner
                .interrupts
                .get_mut(interrupt_id)
                .ok_or_else(|| HubError::interrupt_not_found(interrupt_id))?;
            if entry.status.is_terminal() {
                return Err(self.terminal_error(&entry));
            }
            entry.status = InterruptStatus::Expired;
            entry.clone()
        };
        self.inner.open_by_run.remove(&interrupt.run_id);
        if let Some((_, waiter)) = self.inner.waiters.remove(interrupt_id) {
            let _ = waiter.send(InterruptOutcome::Expired);
        }
        Ok(interrupt)
    }

    pub fn cancel(&self, interrupt_id: &str) -> HubResult<Interrupt> {
        let interrupt = {
            let mut entry = self
                .inner
                .interrupts
                .get_mut(interrupt_id)
                .ok_or_else(|| HubError::interrupt_not_found(interrupt_id))?;
            if entry.status.is_terminal() {
                return Err(self.terminal_error(&entry));
            }
            entry.status = InterruptStatus::Cancelled;
            entry.clone()
        };
        self.inner.open_by_run.remove(&interrupt.run_id);
        if let Some((_, waiter)) = self.inner.waiters.remove(interrupt_id) {
            let _ = waiter.send(InterruptOutcome::Cancelled);
        }
        Ok(interrupt)
    }

    /// Cancels the run's open interrupt, if any. Used by run cancellation.
    pub fn cancel_for_run(&self, run_id: &str) -> Option<Interrupt> {
        let interrupt_id = self.inner.open_by_run.get(run_id).map(|id| id.clone())?;
        self.cancel(&interrupt_id).ok()
    }

    /// Open interrupt for a run, if any.
    pub fn open_for_run(&self, run_id: &str) -> Option<Interrupt> {
        let interrupt_id = self.inner.open_by_run.get(run_id).map(|id| id.clone())?;
        self.get(&interrupt_id).ok()
    }

    /// Expires everything past its deadline. Returns the expired interrupts.
    pub fn sweep_expired(&self) -> Vec<Interrupt> {
        let now = Utc::now();
        let due: Vec<String> = self
            .inner
            .interrupts
            .iter()
            .filter(|i| !i.status.is_terminal() && i.expires_at <= now)
            .map(|i| i.interrupt_id.clone())
            .collect();
        due.iter().filter_map(|id| self.expire(id).ok()).collect()
    }

    /// Background sweeper at a fixed cadence.
    pub fn spawn_sweeper(&self, cadence: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        for expired in service.sweep_expired() {
                            tracing::info!(
                                interrupt_id = %expired.interrupt_id,
                                run_id = %expired.run_id,
                                "interrupt expired"
                            );
                        }
                    }
                }
            }
        })
    }

    fn advance(
        &self,
        interrupt_id: &str,
        from: InterruptStatus,
        to: InterruptStatus,
    ) -> HubResult<Interrupt> {
        let mut entry = self
            .inner
            .interrupts
            .get_mut(interrupt_id)
            .ok_or_else(|| HubError::interrupt_not_found(interrupt_id))?;
        if entry.status.is_terminal() {
            return Err(self.terminal_error(&entry));
        }
        if entry.status == from {
            entry.status = to;
        }
        Ok(entry.clone())
    }

    fn terminal_error(&self, interrupt: &Interrupt) -> HubError {
        let code = if interrupt.status == InterruptStatus::Expired {
            ErrorCode::InterruptExpired
        } else {
            ErrorCode::InterruptConflict
        };
        HubError::new(
            code,
            format!(
                "interrupt {} already {}",
                interrupt.interrupt_id,
                interrupt.status.as_str()
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::{InterruptKind, InterruptPayload, InterruptPriority};
    use serde_json::json;

    fn spec(run_id: &str, timeout_ms: u64) -> InterruptSpec {
        InterruptSpec {
            run_id: run_id.into(),
            thread_id: None,
            agent_id: "billing".into(),
            kind: InterruptKind::ApprovalRequired,
            priority: InterruptPriority::High,
            payload: InterruptPayload {
                message: "approve the refund?".into(),
                ..Default::default()
            },
            timeout_ms,
        }
    }

    #[tokio::test]
    async fn create_resolve_delivers_response() {
        let svc = InterruptService::new();
        let (interrupt, rx) = svc.create(spec("run-1", 60_000)).unwrap();
        assert_eq!(interrupt.status, InterruptStatus::Pending);

        svc.resolve(&interrupt.interrupt_id, json!("approve")).unwrap();
        match rx.await.unwrap() {
            InterruptOutcome::Resolved(v) => assert_eq!(v, "approve"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let stored = svc.get(&interrupt.interrupt_id).unwrap();
        assert_eq!(stored.status, InterruptStatus::Resolved);
        assert!(stored.resolved_at.is_some());
        assert!(svc.open_for_run("run-1").is_none());
    }

    #[tokio::test]
    async fn second_resolution_conflicts() {
        let svc = InterruptService::new();
        let (interrupt, _rx) = svc.create(spec("run-1", 60_000)).unwrap();
        svc.resolve(&interrupt.interrupt_id, json!("approve")).unwrap();
        let err = svc
            .resolve(&interrupt.interrupt_id, json!("deny"))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InterruptConflict);
        assert_eq!(
            svc.get(&interrupt.interrupt_id).unwrap().response.unwrap(),
            "approve"
        );
    }

    #[tokio::test]
    async fn one_open_interrupt_per_run() {
        let svc = InterruptService::new();
        let (first, _rx) = svc.create(spec("run-1", 60_000)).unwrap();
        let err = svc.create(spec("run-1", 60_000)).unwrap_err();
        assert_eq!(err.code, ErrorCode::InterruptConflict);

        svc.resolve(&first.interrupt_id, json!(null)).unwrap();
        assert!(svc.create(spec("run-1", 60_000)).is_ok());
    }

    #[tokio::test]
    async fn notify_and_view_are_optional_acknowledgements() {
        let svc = InterruptService::new();
        let (interrupt, rx) = svc.create(spec("run-1", 60_000)).unwrap();
        assert_eq!(
            svc.notify(&interrupt.interrupt_id).unwrap().status,
            InterruptStatus::Notified
        );
        assert_eq!(
            svc.view(&interrupt.interrupt_id).unwrap().status,
            InterruptStatus::Viewed
        );
        // resolution is legal from viewed
        svc.resolve(&interrupt.interrupt_id, json!({"ok": true})).unwrap();
        assert!(matches!(rx.await.unwrap(), InterruptOutcome::Resolved(_)));
    }

    #[tokio::test]
    async fn sweep_expires_due_interrupts() {
        let svc = InterruptService::new();
        let (due, rx) = svc.create(spec("run-1", 0)).unwrap();
        let (fresh, _rx2) = svc.create(spec("run-2", 60_000)).unwrap();

        let expired = svc.sweep_expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].interrupt_id, due.interrupt_id);
        assert!(matches!(rx.await.unwrap(), InterruptOutcome::Expired));
        assert_eq!(
            svc.get(&fresh.interrupt_id).unwrap().status,
            InterruptStatus::Pending
        );
    }

    #[tokio::test]
    async fn cancel_for_run_closes_open_interrupt() {
        let svc = InterruptService::new();
        let (interrupt, rx) = svc.create(spec("run-1", 60_000)).unwrap();
        let cancelled = svc.cancel_for_run("run-1").unwrap();
        assert_eq!(cancelled.interrupt_id, interrupt.interrupt_id);
        assert_eq!(cancelled.status, InterruptStatus::Cancelled);
        assert!(matches!(rx.await.unwrap(), InterruptOutcome::Cancelled));
        assert!(svc.cancel_for_run("run-1").is_none());
    }

    #[tokio::test]
    async fn list_filters() {
        let svc = InterruptService::new();
        svc.create(spec("run-1", 60_000)).unwrap();
        svc.create(spec("run-2", 60_000)).unwrap();
        let all = svc.list(&InterruptFilter::default());
        assert_eq!(all.len(), 2);
        let one = svc.list(&InterruptFilter {
            run_id: Some("run-2".into()),
            ..Default::default()
        });
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].run_id, "run-2");
        let none = svc.list(&InterruptFilter {
            status: Some(InterruptStatus::Resolved),
            ..Default::default()
        });
        assert!(none.is_empty());
    }
}
