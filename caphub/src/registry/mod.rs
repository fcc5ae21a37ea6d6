//! Agent registry: catalog of agents, lifecycle gating, discovery, health.
//!
//! The registry exclusively owns agent records. Writes are write-through: a
//! registration is durable in the backing [`AgentStore`] before the call
//! returns, and the in-memory cache reflects the post-write state atomically.

mod health;
mod store;
mod types;

pub use health::{ComponentProbe, HealthMonitor};
pub use store::{AgentStore, MemoryAgentStore};
pub use types::{
    Agent, AgentPatch, AgentSpec, AgentStatus, Capabilities, ComponentCheck, DiscoverCriteria,
    Extensions, HealthState, HealthStatus, InterruptTimeoutPolicy, LifecycleState, Version,
};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;

use crate::error::{ErrorCode, HubError, HubResult};

/// Rolling outcome window used for the health success rate.
const OUTCOME_WINDOW: usize = 64;

#[derive(Debug, Default)]
pub(crate) struct AgentStats {
    pub(crate) active: AtomicU32,
    pub(crate) queued: AtomicU32,
    fail_streak: AtomicU32,
    outcomes: Mutex<VecDeque<(bool, u64)>>,
}

impl AgentStats {
    fn record(&self, success: bool, latency_ms: u64) {
        let mut outcomes = self.outcomes.lock().unwrap_or_else(|p| p.into_inner());
        if outcomes.len() >= OUTCOME_WINDOW {
            outcomes.pop_front();
        }
        outcomes.push_back((success, latency_ms));
        if success {
            self.fail_streak.store(0, Ordering::Relaxed);
        } else {
            self.fail_streak.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// (success rate, average latency ms) over the window; rate is 1.0 when empty.
    pub(crate) fn window_summary(&self) -> (f64, u64) {
        let outcomes = self.outcomes.lock().unwrap_or_else(|p| p.into_inner());
        if outcomes.is_empty() {
            return (1.0, 0);
        }
        let ok = outcomes.iter().filter(|(s, _)| *s).count();
        let total_latency: u64 = outcomes.iter().map(|(_, l)| l).sum();
        (
            ok as f64 / outcomes.len() as f64,
            total_latency / outcomes.len() as u64,
        )
    }

    pub(crate) fn streak(&self) -> u32 {
        self.fail_streak.load(Ordering::Relaxed)
    }
}

/// Guard for one occupied concurrency slot. Dropping without
/// [`finish`](RunPermit::finish) counts as a failure with zero latency.
pub struct RunPermit {
    stats: Arc<AgentStats>,
    registry: AgentRegistry,
    agent_id: String,
    done: bool,
}

impl std::fmt::Debug for RunPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunPermit")
            .field("agent_id", &self.agent_id)
            .field("done", &self.done)
            .finish()
    }
}

impl RunPermit {
    /// Releases the slot, recording the run outcome for health.
    pub fn finish(mut self, success: bool, latency_ms: u64) {
        self.release(success, latency_ms);
        self.done = true;
    }

    fn release(&self, success: bool, latency_ms: u64) {
        self.stats.record(success, latency_ms);
        let remaining = self.stats.active.fetch_sub(1, Ordering::AcqRel) - 1;
        self.registry
            .note_occupancy(&self.agent_id, remaining);
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        if !self.done {
            self.release(false, 0);
        }
    }
}

struct RegistryInner {
    cache: DashMap<String, Agent>,
    stats: DashMap<String, Arc<AgentStats>>,
    store: Arc<dyn AgentStore>,
    max_agents_per_system: usize,
}

/// Authoritative agent catalog. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AgentRegistry {
    inner: Arc<RegistryInner>,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn AgentStore>, max_agents_per_system: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                cache: DashMap::new(),
                stats: DashMap::new(),
                store,
                max_agents_per_system: max_agents_per_system.max(1),
            }),
        }
    }

    /// Re-warms the cache from the backing store (startup, distributed mode).
    pub async fn warm(&self) -> HubResult<usize> {
        let agents = self.inner.store.load_all().await?;
        let count = agents.len();
        for agent in agents {
            self.inner.cache.insert(agent.agent_id.clone(), agent);
        }
        Ok(count)
    }

    /// Registers a new agent. Conflict when the same `agent_id` + `version`
    /// already exists in a non-terminal lifecycle state.
    pub async fn register(&self, spec: AgentSpec) -> HubResult<Agent> {
        spec.validate()?;
        if let Some(existing) = self.inner.cache.get(&spec.agent_id) {
            if existing.version == spec.version && !existing.lifecycle_state.is_terminal() {
                return Err(HubError::new(
                    ErrorCode::AgentConflict,
                    format!(
                        "agent {} version {} already registered",
                        spec.agent_id, spec.version
                    ),
                )
                .with_context("agent_id", spec.agent_id.clone()));
            }
        }
        let in_system = self
            .inner
            .cache
            .iter()
            .filter(|a| a.system == spec.system)
            .count();
        if in_system >= self.inner.max_agents_per_system {
            return Err(HubError::new(
                ErrorCode::LimitExceeded,
                format!("system {} is at its agent limit", spec.system),
            )
            .with_context("system", spec.system.clone()));
        }

        let mut agent = Agent::from_spec(spec);
        // Logical agents have no async boot step; registration walks the
        // cohort prefix registered -> initializing -> ready synchronously.
        agent.lifecycle_state = LifecycleState::Ready;
        agent.updated_at = Utc::now();

        self.inner.store.put(&agent).await?;
        self.inner.cache.insert(agent.agent_id.clone(), agent.clone());
        self.inner
            .stats
            .entry(agent.agent_id.clone())
            .or_insert_with(|| Arc::new(AgentStats::default()));
        tracing::info!(agent_id = %agent.agent_id, version = %agent.version, "agent registered");
        Ok(agent)
    }

    pub async fn update(&self, agent_id: &str, patch: AgentPatch) -> HubResult<Agent> {
        let mut agent = self
            .inner
            .cache
            .get(agent_id)
            .map(|a| a.clone())
            .ok_or_else(|| HubError::agent_not_found(agent_id))?;
        patch.apply(&mut agent)?;
        agent.updated_at = Utc::now();
        self.inner.store.put(&agent).await?;
        self.inner.cache.insert(agent.agent_id.clone(), agent.clone());
        Ok(agent)
    }

    pub async fn delete(&self, agent_id: &str) -> HubResult<()> {
        if self.inner.cache.remove(agent_id).is_none() {
            return Err(HubError::agent_not_found(agent_id));
        }
        self.inner.stats.remove(agent_id);
        self.inner.store.delete(agent_id).await
    }

    pub fn get(&self, agent_id: &str) -> HubResult<Agent> {
        self.inner
            .cache
            .get(agent_id)
            .map(|a| a.clone())
            .ok_or_else(|| HubError::agent_not_found(agent_id))
    }

    /// Filtered listing, sorted by health (healthy first), then routing
    /// weight descending, then lexicographic agent id.
    pub fn discover(&self, criteria: &DiscoverCriteria) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self
            .inner
            .cache
            .iter()
            .filter(|a| criteria.matches(a))
            .map(|a| a.clone())
            .collect();
        agents.sort_by(|a, b| {
            a.health
                .status
                .rank()
                .cmp(&b.health.status.rank())
                .then(b.routing_weight.cmp(&a.routing_weight))
                .then(a.agent_id.cmp(&b.agent_id))
        });
        let offset = criteria.offset.unwrap_or(0);
        let mut out: Vec<Agent> = agents.into_iter().skip(offset).collect();
        if let Some(limit) = criteria.limit {
            out.truncate(limit);
        }
        out
    }

    /// Current health snapshot with live run counters folded in.
    pub fn health(&self, agent_id: &str) -> HubResult<HealthStatus> {
        let agent = self.get(agent_id)?;
        let stats = self.stats_for(agent_id);
        let (success_rate, avg_latency_ms) = stats.window_summary();
        let mut snapshot = agent.health;
        snapshot.success_rate = success_rate;
        snapshot.avg_latency_ms = avg_latency_ms;
        snapshot.active_runs = stats.active.load(Ordering::Acquire);
        snapshot.queued_runs = stats.queued.load(Ordering::Acquire);
        snapshot.checked_at = Utc::now();
        Ok(snapshot)
    }

    pub async fn set_routing_weight(&self, agent_id: &str, weight: i32) -> HubResult<Agent> {
        let mut agent = self.get(agent_id)?;
        agent.routing_weight = weight;
        agent.updated_at = Utc::now();
        self.inner.store.put(&agent).await?;
        self.inner.cache.insert(agent.agent_id.clone(), agent.clone());
        Ok(agent)
    }

    pub async fn deprecate(&self, agent_id: &str) -> HubResult<Agent> {
        let mut agent = self.get(agent_id)?;
        agent.status = AgentStatus::Deprecated;
        agent.updated_at = Utc::now();
        self.inner.store.put(&agent).await?;
        self.inner.cache.insert(agent.agent_id.clone(), agent.clone());
        Ok(agent)
    }

    /// Dispatch gate: `active` status, a dispatchable lifecycle state, a free
    /// concurrency slot, and not `unhealthy`. On success the returned permit
    /// holds the slot until finished or dropped.
    pub fn try_begin_run(&self, agent_id: &str) -> HubResult<(Agent, RunPermit)> {
        let agent = self.get(agent_id)?;
        if agent.health.status == HealthState::Unhealthy {
            return Err(HubError::new(
                ErrorCode::AgentUnhealthy,
                format!("agent unhealthy: {agent_id}"),
            )
            .with_context("agent_id", agent_id));
        }
        if agent.status != AgentStatus::Active {
            return Err(HubError::agent_not_ready(agent_id, "status not active"));
        }
        if !agent.lifecycle_state.is_dispatchable() {
            return Err(HubError::agent_not_ready(
                agent_id,
                &format!("lifecycle {}", agent.lifecycle_state),
            ));
        }
        let stats = self.stats_for(agent_id);
        let max = agent.extensions.max_concurrent_runs.max(1);
        let mut current = stats.active.load(Ordering::Acquire);
        loop {
            if current >= max {
                return Err(HubError::agent_not_ready(agent_id, "at max concurrent runs")
                    .with_context("max_concurrent_runs", max));
            }
            match stats.active.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(seen) => current = seen,
            }
        }
        self.note_occupancy(agent_id, current + 1);
        Ok((
            agent,
            RunPermit {
                stats,
                registry: self.clone(),
                agent_id: agent_id.to_string(),
                done: false,
            },
        ))
    }

    /// Queue-depth accounting for health snapshots.
    pub fn note_queued(&self, agent_id: &str, delta: i32) {
        let stats = self.stats_for(agent_id);
        if delta >= 0 {
            stats.queued.fetch_add(delta as u32, Ordering::AcqRel);
        } else {
            let dec = (-delta) as u32;
            let mut current = stats.queued.load(Ordering::Acquire);
            loop {
                let next = current.saturating_sub(dec);
                match stats.queued.compare_exchange(
                    current,
                    next,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(seen) => current = seen,
                }
            }
        }
    }

    pub fn active_runs(&self, agent_id: &str) -> u32 {
        self.stats_for(agent_id).active.load(Ordering::Acquire)
    }

    /// Cache-only idle/running oscillation from the occupancy count.
    /// Runtime state, not written through.
    fn note_occupancy(&self, agent_id: &str, active: u32) {
        if let Some(mut agent) = self.inner.cache.get_mut(agent_id) {
            let next = match (agent.lifecycle_state, active) {
                (LifecycleState::Ready | LifecycleState::Idle, n) if n > 0 => {
                    Some(LifecycleState::Running)
                }
                (LifecycleState::Running, 0) => Some(LifecycleState::Idle),
                _ => None,
            };
            if let Some(state) = next {
                agent.lifecycle_state = state;
            }
        }
    }

    pub(crate) fn stats_for(&self, agent_id: &str) -> Arc<AgentStats> {
        self.inner
            .stats
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(AgentStats::default()))
            .clone()
    }

    pub(crate) fn all_agents(&self) -> Vec<Agent> {
        self.inner.cache.iter().map(|a| a.clone()).collect()
    }

    pub(crate) fn set_health(&self, agent_id: &str, health: HealthStatus) {
        if let Some(mut agent) = self.inner.cache.get_mut(agent_id) {
            agent.health = health;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str) -> AgentSpec {
        AgentSpec {
            agent_id: id.into(),
            version: "1.0.0".parse().unwrap(),
            system: "core".into(),
            agent_type: "llm".into(),
            description: None,
            capabilities: Capabilities::default(),
            extensions: Extensions::default(),
        }
    }

    fn registry() -> AgentRegistry {
        AgentRegistry::new(Arc::new(MemoryAgentStore::new()), 100)
    }

    #[tokio::test]
    async fn register_then_get_round_trip() {
        let reg = registry();
        let agent = reg.register(spec("billing")).await.unwrap();
        assert_eq!(agent.lifecycle_state, LifecycleState::Ready);
        let got = reg.get("billing").unwrap();
        assert_eq!(got.agent_id, agent.agent_id);
        assert_eq!(got.version, agent.version);
    }

    #[tokio::test]
    async fn duplicate_id_and_version_conflicts() {
        let reg = registry();
        reg.register(spec("billing")).await.unwrap();
        let err = reg.register(spec("billing")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AgentConflict);
    }

    #[tokio::test]
    async fn per_system_limit_enforced() {
        let reg = AgentRegistry::new(Arc::new(MemoryAgentStore::new()), 1);
        reg.register(spec("a")).await.unwrap();
        let err = reg.register(spec("b")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::LimitExceeded);
    }

    #[tokio::test]
    async fn concurrency_slots_bound_active_runs() {
        let reg = registry();
        let mut s = spec("billing");
        s.extensions.max_concurrent_runs = 2;
        reg.register(s).await.unwrap();

        let (_, p1) = reg.try_begin_run("billing").unwrap();
        let (_, p2) = reg.try_begin_run("billing").unwrap();
        let err = reg.try_begin_run("billing").unwrap_err();
        assert_eq!(err.code, ErrorCode::AgentNotReady);
        assert_eq!(reg.active_runs("billing"), 2);

        p1.finish(true, 12);
        assert_eq!(reg.active_runs("billing"), 1);
        let (_, p3) = reg.try_begin_run("billing").unwrap();
        p2.finish(true, 8);
        p3.finish(false, 30);
        assert_eq!(reg.active_runs("billing"), 0);
    }

    #[tokio::test]
    async fn inactive_agent_is_not_dispatchable() {
        let reg = registry();
        reg.register(spec("billing")).await.unwrap();
        reg.update(
            "billing",
            AgentPatch {
                status: Some(AgentStatus::Inactive),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let err = reg.try_begin_run("billing").unwrap_err();
        assert_eq!(err.code, ErrorCode::AgentNotReady);
    }

    #[tokio::test]
    async fn draining_accepts_no_new_runs() {
        let reg = registry();
        reg.register(spec("billing")).await.unwrap();
        reg.update(
            "billing",
            AgentPatch {
                lifecycle_state: Some(LifecycleState::Draining),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let err = reg.try_begin_run("billing").unwrap_err();
        assert_eq!(err.code, ErrorCode::AgentNotReady);
    }

    #[tokio::test]
    async fn unhealthy_agent_is_rejected_with_unhealthy_code() {
        let reg = registry();
        reg.register(spec("billing")).await.unwrap();
        let mut health = reg.health("billing").unwrap();
        health.status = HealthState::Unhealthy;
        reg.set_health("billing", health);
        let err = reg.try_begin_run("billing").unwrap_err();
        assert_eq!(err.code, ErrorCode::AgentUnhealthy);
    }

    #[tokio::test]
    async fn discover_filters_and_orders() {
        let reg = registry();
        for (id, weight) in [("gamma", 5), ("alpha", 5), ("beta", 50)] {
            reg.register(spec(id)).await.unwrap();
            reg.set_routing_weight(id, weight).await.unwrap();
        }
        let mut unhealthy = reg.health("beta").unwrap();
        unhealthy.status = HealthState::Unhealthy;
        reg.set_health("beta", unhealthy);

        let found = reg.discover(&DiscoverCriteria {
            system: Some("core".into()),
            ..Default::default()
        });
        let ids: Vec<&str> = found.iter().map(|a| a.agent_id.as_str()).collect();
        // healthy before unhealthy; ties by weight then id
        assert_eq!(ids, vec!["alpha", "gamma", "beta"]);

        let by_tool = reg.discover(&DiscoverCriteria {
            tool: Some("nonexistent".into()),
            ..Default::default()
        });
        assert!(by_tool.is_empty());
    }

    #[tokio::test]
    async fn warm_reloads_from_store() {
        let store = Arc::new(MemoryAgentStore::new());
        let reg = AgentRegistry::new(store.clone(), 100);
        reg.register(spec("billing")).await.unwrap();

        let rewarmed = AgentRegistry::new(store, 100);
        assert_eq!(rewarmed.warm().await.unwrap(), 1);
        assert!(rewarmed.get("billing").is_ok());
    }

    #[tokio::test]
    async fn delete_removes_agent() {
        let reg = registry();
        reg.register(spec("billing")).await.unwrap();
        reg.delete("billing").await.unwrap();
        assert_eq!(
            reg.get("billing").unwrap_err().code,
            ErrorCode::AgentNotFound
        );
        assert_eq!(reg.delete("billing").await.unwrap_err().code, ErrorCode::AgentNotFound);
    }
}
