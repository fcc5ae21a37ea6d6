//! Composition root: constructs and wires the hub services, owns shutdown.
//!
//! Registries and services are explicitly constructed and passed by
//! reference; nothing here is a process-wide singleton.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventBus, EventFilter, OverflowPolicy, Subscription};
use crate::error::HubResult;
use crate::handler::{HandlerRegistry, OperationKind, Router, RouterConfig, StepHandler};
use crate::handlers::{AgentStepHandler, LlmStepHandler, RagStepHandler, ToolStepHandler};
use crate::interrupt::InterruptService;
use crate::knowledge::{KnowledgeBackend, MockKnowledge};
use crate::llm::{LlmClient, MockLlm};
use crate::registry::{AgentRegistry, AgentStore, HealthMonitor, MemoryAgentStore};
use crate::run::{
    CheckpointStore, ExecutorConfig, ExecutorParts, MemoryCheckpointStore, RunExecutor,
};
use crate::thread::{MemoryThreadStore, Summarizer, ThreadService, ThreadStore};
use crate::tool_source::{MockToolSource, ToolSource};

/// Hub-wide configuration; defaults match the documented environment knobs.
#[derive(Clone, Debug)]
pub struct HubConfig {
    pub pool_size: usize,
    pub checkpoint_interval: Duration,
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    pub grace: Duration,
    pub lease_ttl: Duration,
    pub health_interval: Duration,
    pub unhealthy_threshold: u32,
    pub health_success_floor: f64,
    pub min_confidence: f64,
    pub capability_routing: bool,
    pub max_agents_per_system: usize,
    pub bus_capacity: usize,
    pub bus_policy: OverflowPolicy,
    pub interrupt_sweep_interval: Duration,
    /// Recorded for operators; dispatch stays on the in-process queue until
    /// a remote queue implementation is wired in.
    pub distributed: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            checkpoint_interval: Duration::from_secs(10),
            default_timeout: Duration::from_secs(60),
            max_timeout: Duration::from_secs(600),
            grace: Duration::from_secs(5),
            lease_ttl: Duration::from_secs(30),
            health_interval: Duration::from_secs(30),
            unhealthy_threshold: 3,
            health_success_floor: 0.5,
            min_confidence: 0.5,
            capability_routing: true,
            max_agents_per_system: 100,
            bus_capacity: 256,
            bus_policy: OverflowPolicy::DropOldest,
            interrupt_sweep_interval: Duration::from_millis(500),
            distributed: false,
        }
    }
}

/// Builder for a [`Hub`]. Stores and seams default to the in-memory/mock
/// implementations; swap them for production backends.
pub struct HubBuilder {
    config: HubConfig,
    agent_store: Arc<dyn AgentStore>,
    thread_store: Arc<dyn ThreadStore>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<dyn ToolSource>,
    knowledge: Arc<dyn KnowledgeBackend>,
    summarizer: Option<Arc<dyn Summarizer>>,
    extra_handlers: Vec<Arc<dyn StepHandler>>,
}

impl Default for HubBuilder {
    fn default() -> Self {
        Self {
            config: HubConfig::default(),
            agent_store: Arc::new(MemoryAgentStore::new()),
            thread_store: Arc::new(MemoryThreadStore::new()),
            checkpoint_store: Arc::new(MemoryCheckpointStore::new()),
            llm: Arc::new(MockLlm::new("ok")),
            tools: Arc::new(MockToolSource::new()),
            knowledge: Arc::new(MockKnowledge::new()),
            summarizer: None,
            extra_handlers: Vec::new(),
        }
    }
}

impl HubBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    pub fn agent_store(mut self, store: Arc<dyn AgentStore>) -> Self {
        self.agent_store = store;
        self
    }

    pub fn thread_store(mut self, store: Arc<dyn ThreadStore>) -> Self {
        self.thread_store = store;
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = store;
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = llm;
        self
    }

    pub fn tools(mut self, tools: Arc<dyn ToolSource>) -> Self {
        self.tools = tools;
        self
    }

    pub fn knowledge(mut self, knowledge: Arc<dyn KnowledgeBackend>) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Registers an additional handler alongside the built-ins.
    pub fn handler(mut self, handler: Arc<dyn StepHandler>) -> Self {
        self.extra_handlers.push(handler);
        self
    }

    pub fn build(self) -> HubResult<Hub> {
        let config = self.config;
        let bus = EventBus::new(config.bus_capacity, config.bus_policy);
        let registry = AgentRegistry::new(self.agent_store, config.max_agents_per_system);
        let mut threads = ThreadService::new(self.thread_store);
        if let Some(summarizer) = self.summarizer {
            threads = threads.with_summarizer(summarizer);
        }
        let interrupts = InterruptService::new();

        let handlers = HandlerRegistry::new();
        for operation in [
            OperationKind::Reasoning,
            OperationKind::Classification,
            OperationKind::Extraction,
            OperationKind::Generic,
        ] {
            handlers.register(Arc::new(LlmStepHandler::new(operation, 10)))?;
        }
        handlers.register(Arc::new(RagStepHandler::new(10)))?;
        handlers.register(Arc::new(ToolStepHandler::new(10)))?;
        handlers.register(Arc::new(AgentStepHandler::new(10)))?;
        for handler in self.extra_handlers {
            handlers.register(handler)?;
        }

        let router = Router::new(
            handlers.clone(),
            RouterConfig {
                min_confidence: config.min_confidence,
                capability_routing: config.capability_routing,
            },
        );
        let executor = RunExecutor::new(
            ExecutorParts {
                registry: registry.clone(),
                threads: threads.clone(),
                router,
                interrupts: interrupts.clone(),
                bus: bus.clone(),
                checkpoints: self.checkpoint_store.clone(),
                llm: self.llm,
                tools: self.tools,
                knowledge: self.knowledge,
            },
            ExecutorConfig {
                pool_size: config.pool_size,
                checkpoint_interval: config.checkpoint_interval,
                default_timeout: config.default_timeout,
                max_timeout: config.max_timeout,
                grace: config.grace,
                lease_ttl: config.lease_ttl,
            },
        );

        Ok(Hub {
            config,
            bus,
            registry,
            threads,
            handlers,
            interrupts,
            executor,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

/// The assembled hub. Holds every service and owns the background tasks.
pub struct Hub {
    config: HubConfig,
    bus: EventBus,
    registry: AgentRegistry,
    threads: ThreadService,
    handlers: HandlerRegistry,
    interrupts: InterruptService,
    executor: RunExecutor,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Hub {
    pub fn builder() -> HubBuilder {
        HubBuilder::new()
    }

    /// Warms caches, replays checkpoints, and spawns the worker pool, the
    /// interrupt sweeper, and the health monitor.
    pub async fn start(&self) -> HubResult<()> {
        self.registry.warm().await?;
        let recovered = self.executor.recover().await?;
        if recovered > 0 {
            tracing::info!(recovered, "re-enqueued unfinished runs");
        }
        self.executor.start();
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        tasks.push(
            self.interrupts
                .spawn_sweeper(self.config.interrupt_sweep_interval, self.shutdown.clone()),
        );
        tasks.push(
            HealthMonitor::new(
                self.registry.clone(),
                self.bus.clone(),
                self.config.health_interval,
                self.config.unhealthy_threshold,
                self.config.health_success_floor,
            )
            .spawn(self.shutdown.clone()),
        );
        Ok(())
    }

    /// Stops background tasks; in-flight runs finish their current drive.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.executor.shutdown();
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn threads(&self) -> &ThreadService {
        &self.threads
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn interrupts(&self) -> &InterruptService {
        &self.interrupts
    }

    pub fn executor(&self) -> &RunExecutor {
        &self.executor
    }

    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.bus.subscribe(filter)
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builder_wires_builtin_handlers() {
        let hub = Hub::builder().build().unwrap();
        // four llm operations + rag + tool + agent dispatch
        assert_eq!(hub.handlers().len(), 7);
    }

    #[tokio::test]
    async fn start_and_shutdown() {
        let hub = Hub::builder().build().unwrap();
        hub.start().await.unwrap();
        hub.shutdown();
    }
}
