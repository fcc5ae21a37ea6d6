//! Periodic health probing: rolling success rate, component checks, streaks.
//!
//! Transitions publish `agent:health_changed` on the event bus; the registry
//! snapshot is updated in place so discovery ordering and dispatch gating see
//! the new verdict immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use run_event::RunEvent;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::registry::types::{Agent, ComponentCheck, HealthState, HealthStatus};
use crate::registry::AgentRegistry;

/// One probeable component of an agent (model endpoint, tool transport, …).
#[async_trait]
pub trait ComponentProbe: Send + Sync {
    fn name(&self) -> &str;
    /// Critical components flip the composite to `unhealthy` when they fail.
    fn critical(&self) -> bool {
        false
    }
    async fn check(&self, agent: &Agent) -> Result<(), String>;
}

/// Background prober over every registered agent.
pub struct HealthMonitor {
    registry: AgentRegistry,
    bus: EventBus,
    probes: Vec<Arc<dyn ComponentProbe>>,
    interval: Duration,
    unhealthy_threshold: u32,
    success_floor: f64,
}

impl HealthMonitor {
    pub fn new(
        registry: AgentRegistry,
        bus: EventBus,
        interval: Duration,
        unhealthy_threshold: u32,
        success_floor: f64,
    ) -> Self {
        Self {
            registry,
            bus,
            probes: Vec::new(),
            interval,
            unhealthy_threshold: unhealthy_threshold.max(1),
            success_floor,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ComponentProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    /// Runs probes at the configured cadence until the token is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => self.sweep().await,
                }
            }
        })
    }

    /// One probe pass over all agents. Public for on-demand probing in tests.
    pub async fn sweep(&self) {
        for agent in self.registry.all_agents() {
            let next = self.evaluate(&agent).await;
            let prev = agent.health.status;
            if prev != next.status {
                tracing::info!(
                    agent_id = %agent.agent_id,
                    from = ?prev,
                    to = ?next.status,
                    "agent health changed"
                );
                let ev = RunEvent::AgentHealthChanged {
                    agent_id: agent.agent_id.clone(),
                    from: format!("{prev:?}").to_lowercase(),
                    to: format!("{:?}", next.status).to_lowercase(),
                };
                if let Ok(value) = ev.to_value() {
                    self.bus.publish(ev, value);
                }
            }
            self.registry.set_health(&agent.agent_id, next);
        }
    }

    async fn evaluate(&self, agent: &Agent) -> HealthStatus {
        let stats = self.registry.stats_for(&agent.agent_id);
        let (success_rate, avg_latency_ms) = stats.window_summary();

        let mut components = Vec::with_capacity(self.probes.len());
        let mut critical_failed = false;
        let mut noncritical_failed = false;
        for probe in &self.probes {
            let result = probe.check(agent).await;
            let ok = result.is_ok();
            if !ok {
                if probe.critical() {
                    critical_failed = true;
                } else {
                    noncritical_failed = true;
                }
            }
            components.push(ComponentCheck {
                name: probe.name().to_string(),
                ok,
                critical: probe.critical(),
                detail: result.err(),
            });
        }

        let status = if critical_failed || stats.streak() >= self.unhealthy_threshold {
            HealthState::Unhealthy
        } else if noncritical_failed || success_rate < self.success_floor {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        HealthStatus {
            status,
            avg_latency_ms,
            success_rate,
            active_runs: stats.active.load(std::sync::atomic::Ordering::Acquire),
            queued_runs: stats.queued.load(std::sync::atomic::Ordering::Acquire),
            components,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EventFilter, OverflowPolicy};
    use crate::registry::types::{AgentSpec, Capabilities, Extensions, Version};
    use crate::registry::MemoryAgentStore;

    struct FixedProbe {
        name: &'static str,
        critical: bool,
        ok: bool,
    }

    #[async_trait]
    impl ComponentProbe for FixedProbe {
        fn name(&self) -> &str {
            self.name
        }
        fn critical(&self) -> bool {
            self.critical
        }
        async fn check(&self, _agent: &Agent) -> Result<(), String> {
            if self.ok {
                Ok(())
            } else {
                Err("down".to_string())
            }
        }
    }

    async fn registry_with_agent() -> AgentRegistry {
        let reg = AgentRegistry::new(Arc::new(MemoryAgentStore::new()), 100);
        reg.register(AgentSpec {
            agent_id: "billing".into(),
            version: Version::new(1, 0, 0),
            system: "core".into(),
            agent_type: "llm".into(),
            description: None,
            capabilities: Capabilities::default(),
            extensions: Extensions::default(),
        })
        .await
        .unwrap();
        reg
    }

    fn monitor(reg: &AgentRegistry, bus: &EventBus) -> HealthMonitor {
        HealthMonitor::new(reg.clone(), bus.clone(), Duration::from_secs(30), 3, 0.5)
    }

    #[tokio::test]
    async fn all_checks_pass_is_healthy_and_publishes_change() {
        let reg = registry_with_agent().await;
        let bus = EventBus::new(16, OverflowPolicy::DropOldest);
        let mut sub = bus.subscribe(EventFilter::All);
        let m = monitor(&reg, &bus).with_probe(Arc::new(FixedProbe {
            name: "model",
            critical: true,
            ok: true,
        }));
        m.sweep().await;
        assert_eq!(
            reg.get("billing").unwrap().health.status,
            HealthState::Healthy
        );
        // unknown -> healthy publishes a change event
        let ev = sub.recv().await.unwrap();
        assert_eq!(ev.event.name(), "agent:health_changed");
    }

    #[tokio::test]
    async fn critical_failure_is_unhealthy() {
        let reg = registry_with_agent().await;
        let bus = EventBus::new(16, OverflowPolicy::DropOldest);
        let m = monitor(&reg, &bus).with_probe(Arc::new(FixedProbe {
            name: "model",
            critical: true,
            ok: false,
        }));
        m.sweep().await;
        assert_eq!(
            reg.get("billing").unwrap().health.status,
            HealthState::Unhealthy
        );
    }

    #[tokio::test]
    async fn noncritical_failure_is_degraded() {
        let reg = registry_with_agent().await;
        let bus = EventBus::new(16, OverflowPolicy::DropOldest);
        let m = monitor(&reg, &bus).with_probe(Arc::new(FixedProbe {
            name: "metrics",
            critical: false,
            ok: false,
        }));
        m.sweep().await;
        let health = reg.get("billing").unwrap().health;
        assert_eq!(health.status, HealthState::Degraded);
        assert_eq!(health.components.len(), 1);
        assert!(!health.components[0].ok);
    }

    #[tokio::test]
    async fn failure_streak_reaches_unhealthy() {
        let reg = registry_with_agent().await;
        let bus = EventBus::new(16, OverflowPolicy::DropOldest);
        for _ in 0..3 {
            let (_, permit) = reg.try_begin_run("billing").unwrap();
            permit.finish(false, 5);
        }
        let m = monitor(&reg, &bus);
        m.sweep().await;
        assert_eq!(
            reg.get("billing").unwrap().health.status,
            HealthState::Unhealthy
        );
    }

    #[tokio::test]
    async fn low_success_rate_is_degraded() {
        let reg = registry_with_agent().await;
        let bus = EventBus::new(16, OverflowPolicy::DropOldest);
        // one success in three keeps the failure streak below the threshold
        for i in 0..9 {
            let (_, permit) = reg.try_begin_run("billing").unwrap();
            permit.finish(i % 3 == 0, 5);
        }
        let m = monitor(&reg, &bus);
        m.sweep().await;
        let health = reg.get("billing").unwrap().health;
        assert_eq!(health.status, HealthState::Degraded);
        assert!(health.success_rate < 0.5);
    }
}
