//! # caphub
//!
//! A multi-agent execution hub: register logical agents, open stateful
//! conversation threads against them, and drive runs through a pipeline of
//! typed steps. A step may call a language model, invoke a tool, query a
//! retrieval backend, hand control to a sub-agent, or suspend the run for a
//! human-in-the-loop decision.
//!
//! ## Design principles
//!
//! - **Explicit services, one composition root**: no global registries. The
//!   [`Hub`] builder constructs the agent registry, thread store, handler
//!   registry, interrupt service, event bus, and executor, wires them, and
//!   owns shutdown.
//! - **Result discipline**: every operation returns [`HubResult`]; errors
//!   carry a stable code, a `retryable` flag, and a context map, and never
//!   panic across component boundaries.
//! - **Interface-only collaborators**: persistence ([`AgentStore`],
//!   [`ThreadStore`], [`CheckpointStore`]), the model provider
//!   ([`LlmClient`]), the tool transport ([`ToolSource`]), and the retrieval
//!   backend ([`KnowledgeBackend`]) are traits with in-memory/mock
//!   implementations; SQLite-backed stores ship for threads and checkpoints.
//! - **Cooperative cancellation**: every run binds an abort token; handlers
//!   observe it on each I/O boundary. Deadlines exclude time spent suspended
//!   on an interrupt.
//!
//! ## Main modules
//!
//! - [`registry`]: [`AgentRegistry`] — register/update/discover/delete
//!   agents, lifecycle gating, health probing.
//! - [`thread`]: [`ThreadService`] over [`ThreadStore`] — append-only
//!   conversation logs, status machine, context-window assembly.
//! - [`handler`]: [`StepHandler`], [`HandlerRegistry`], [`Router`] —
//!   capability/pattern/priority routing.
//! - [`run`]: [`RunExecutor`] — queueing, step dispatch, streaming,
//!   checkpointing, cancel, timeout, restart recovery.
//! - [`interrupt`]: [`InterruptService`] — suspension points and the
//!   resume protocol.
//! - [`bus`]: [`EventBus`] — bounded pub/sub for lifecycle events.
//! - [`handlers`]: built-in handlers for the llm / rag / tool_call /
//!   agent_invocation operation families.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use caphub::{Hub, AgentSpec, RunInput};
//!
//! # #[tokio::main]
//! # async fn main() -> caphub::HubResult<()> {
//! let hub = Hub::builder().build()?;
//! hub.start().await?;
//!
//! hub.registry()
//!     .register(AgentSpec {
//!         agent_id: "support".into(),
//!         version: "1.0.0".parse().unwrap(),
//!         system: "core".into(),
//!         agent_type: "llm".into(),
//!         description: None,
//!         capabilities: Default::default(),
//!         extensions: Default::default(),
//!     })
//!     .await?;
//!
//! let run = hub
//!     .executor()
//!     .submit(serde_json::from_value::<RunInput>(serde_json::json!({
//!         "agent_id": "support",
//!         "payload": { "question": "what is our refund policy?" }
//!     })).unwrap())
//!     .await?;
//! let done = hub.executor().wait_terminal(&run.run_id).await?;
//! println!("{:?}", done.status);
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod hub;
pub mod interrupt;
pub mod knowledge;
pub mod llm;
pub mod registry;
pub mod retry;
pub mod run;
pub mod thread;
pub mod tool_source;

pub use bus::{BusEvent, EventBus, EventFilter, OverflowPolicy, Subscription};
pub use error::{ErrorCode, HubError, HubResult};
pub use handler::{
    HandlerMetadata, HandlerOutput, HandlerRegistry, OperationKind, RouteDecision, Router,
    RouterConfig, StepHandler,
};
pub use handlers::{AgentStepHandler, LlmStepHandler, RagStepHandler, ToolStepHandler};
pub use hub::{Hub, HubBuilder, HubConfig};
pub use interrupt::{
    Interrupt, InterruptFilter, InterruptKind, InterruptPayload, InterruptPriority,
    InterruptService, InterruptSpec, InterruptStatus,
};
pub use knowledge::{KnowledgeBackend, KnowledgeHit, MockKnowledge};
pub use llm::{LlmClient, LlmReply, LlmUsage, MockLlm};
pub use registry::{
    Agent, AgentPatch, AgentRegistry, AgentSpec, AgentStatus, AgentStore, Capabilities,
    ComponentCheck, ComponentProbe, DiscoverCriteria, Extensions, HealthMonitor, HealthState,
    HealthStatus, InterruptTimeoutPolicy, LifecycleState, MemoryAgentStore, Version,
};
pub use retry::{retry_with, RetryPolicy};
pub use run::{
    CheckpointStore, ExecutionContext, ExecutorConfig, MemoryCheckpointStore, ParallelPolicy, Run,
    RunErrorInfo, RunExecutor, RunInput, RunOptions, RunOutput, RunSnapshot, RunStatus,
    SqliteCheckpointStore, Step, StepGuard, StepKind, StepStatus,
};
pub use thread::{
    ContextPolicy, ContextStrategy, ContextWindow, MemoryThreadStore, MessageFilter,
    MessageMetadata, MessageRole, NewMessage, SqliteThreadStore, SummarizePolicy, Summarizer,
    Thread, ThreadMessage, ThreadService, ThreadStatus, ThreadStore, ThreadSummary,
};
pub use tool_source::{MockToolSource, ToolSource, ToolSpec};

/// When running `cargo test -p caphub`, initializes tracing from `RUST_LOG`
/// so unit tests can print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
