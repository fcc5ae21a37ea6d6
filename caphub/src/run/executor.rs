//! Run executor: worker pool, per-run state machine, checkpoints, recovery.
//!
//! Each worker claims one run at a time from the queue, gates it against the
//! registry, routes it to a handler, and supervises execution: checkpoint
//! cadence, deadline with grace window, cancellation, terminal bookkeeping.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use run_event::RunEvent;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::error::{ErrorCode, HubError, HubResult};
use crate::handler::{HandlerOutput, Router};
use crate::interrupt::InterruptService;
use crate::knowledge::KnowledgeBackend;
use crate::llm::LlmClient;
use crate::registry::{Agent, AgentRegistry, RunPermit};
use crate::run::context::{ContextSeams, RunHandle, SubRunner, Transition};
use crate::run::{
    CheckpointStore, ExecutionContext, LocalQueue, QueueClaim, QueueJob, Run, RunErrorInfo,
    RunInput, RunOutput, RunStatus, WorkQueue,
};
use crate::thread::{
    ContextPolicy, MessageRole, NewMessage, ThreadMessage, ThreadService, ThreadStatus,
};
use crate::tool_source::ToolSource;

/// Executor knobs; see the environment section of the config crate for the
/// corresponding `CAPHUB_*` keys.
#[derive(Clone, Copy, Debug)]
pub struct ExecutorConfig {
    pub pool_size: usize,
    pub checkpoint_interval: Duration,
    /// Fallback deadline for agents that do not set one.
    pub default_timeout: Duration,
    /// Process-wide ceiling on any run deadline.
    pub max_timeout: Duration,
    /// Window a handler gets to observe cancellation before force termination.
    pub grace: Duration,
    pub lease_ttl: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            checkpoint_interval: Duration::from_secs(10),
            default_timeout: Duration::from_secs(60),
            max_timeout: Duration::from_secs(600),
            grace: Duration::from_secs(5),
            lease_ttl: Duration::from_secs(30),
        }
    }
}

/// Services the executor is wired with by the composition root.
pub struct ExecutorParts {
    pub registry: AgentRegistry,
    pub threads: ThreadService,
    pub router: Router,
    pub interrupts: InterruptService,
    pub bus: EventBus,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub llm: Arc<dyn LlmClient>,
    pub tools: Arc<dyn ToolSource>,
    pub knowledge: Arc<dyn KnowledgeBackend>,
}

pub(crate) struct ExecutorInner {
    registry: AgentRegistry,
    threads: ThreadService,
    router: Router,
    interrupts: InterruptService,
    bus: EventBus,
    checkpoints: Arc<dyn CheckpointStore>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<dyn ToolSource>,
    knowledge: Arc<dyn KnowledgeBackend>,
    queue: Arc<LocalQueue>,
    runs: DashMap<String, Arc<RunHandle>>,
    config: ExecutorConfig,
    shutdown: CancellationToken,
    weak_self: Weak<ExecutorInner>,
}

/// The run executor. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RunExecutor {
    inner: Arc<ExecutorInner>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

enum Supervised {
    Finished(HubResult<HandlerOutput>),
    DeadlineExceeded,
    Cancelled,
}

impl RunExecutor {
    pub fn new(parts: ExecutorParts, config: ExecutorConfig) -> Self {
        let inner = Arc::new_cyclic(|weak_self| ExecutorInner {
            registry: parts.registry,
            threads: parts.threads,
            router: parts.router,
            interrupts: parts.interrupts,
            bus: parts.bus,
            checkpoints: parts.checkpoints,
            llm: parts.llm,
            tools: parts.tools,
            knowledge: parts.knowledge,
            queue: Arc::new(LocalQueue::new()),
            runs: DashMap::new(),
            config,
            shutdown: CancellationToken::new(),
            weak_self: weak_self.clone(),
        });
        Self {
            inner,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Spawns the worker pool and the queue lease sweeper.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        if !tasks.is_empty() {
            return;
        }
        for worker_id in 0..self.inner.config.pool_size.max(1) {
            let inner = self.inner.clone();
            tasks.push(tokio::spawn(async move {
                ExecutorInner::worker_loop(inner, worker_id).await;
            }));
        }
        tasks.push(
            self.inner
                .queue
                .spawn_lease_sweeper(self.inner.config.lease_ttl / 2, self.inner.shutdown.clone()),
        );
    }

    /// Stops claiming new work. In-flight runs finish their current drive.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Validates and enqueues a run. Local mode enqueues directly as
    /// `queued`; the returned snapshot reflects the post-submit state.
    pub async fn submit(&self, input: RunInput) -> HubResult<Run> {
        let agent = self.inner.validate_input(&input).await?;
        let run = Run::new(input);
        let budget = self.inner.budget_for(&agent, &run.input);
        let handle = RunHandle::new(run, budget);
        // queued time does not count against the deadline
        handle.clock.pause();
        handle.transition(RunStatus::Queued);
        self.inner.registry.note_queued(&agent.agent_id, 1);
        let run = handle.run();
        self.inner.runs.insert(run.run_id.clone(), handle.clone());
        self.inner
            .checkpoints
            .put(&handle.snapshot())
            .await?;
        self.inner
            .queue
            .enqueue(QueueJob::for_run(run.run_id.clone()))
            .await?;
        tracing::info!(run_id = %run.run_id, agent_id = %run.agent_id, "run submitted");
        Ok(run)
    }

    pub async fn get(&self, run_id: &str) -> HubResult<Run> {
        if let Some(handle) = self.inner.runs.get(run_id) {
            return Ok(handle.run());
        }
        // terminal runs from a previous process live only in the checkpoint store
        match self.inner.checkpoints.get(run_id).await? {
            Some(snapshot) => Ok(snapshot.run),
            None => Err(HubError::run_not_found(run_id)),
        }
    }

    /// The enveloped terminal event exactly as it was published for a
    /// finished run, for verbatim replay to late stream subscribers.
    pub async fn terminal_event_value(
        &self,
        run_id: &str,
    ) -> HubResult<Option<serde_json::Value>> {
        if let Some(handle) = self.inner.runs.get(run_id) {
            return Ok(handle.lock().terminal_event.clone());
        }
        Ok(self
            .inner
            .checkpoints
            .get(run_id)
            .await?
            .and_then(|snapshot| snapshot.terminal_event))
    }

    /// Cancels a run. Idempotent: cancelling a terminal run returns its
    /// current state. Returns once the terminal status is durable.
    pub async fn cancel(&self, run_id: &str, reason: &str) -> HubResult<Run> {
        let handle = self
            .inner
            .runs
            .get(run_id)
            .map(|h| h.clone())
            .ok_or_else(|| HubError::run_not_found(run_id))?;
        match handle.transition_with(RunStatus::Cancelled, |state| {
            state.run.error = Some(RunErrorInfo {
                code: ErrorCode::RunCancelled.as_str().to_string(),
                message: reason.to_string(),
                retryable: false,
            });
        }) {
            Transition::Applied(_) => {
                handle.cancel.cancel();
                self.inner.interrupts.cancel_for_run(run_id);
                handle.publish_terminal(
                    &self.inner.bus,
                    RunEvent::Error {
                        run_id: run_id.to_string(),
                        code: ErrorCode::RunCancelled.as_str().to_string(),
                        message: reason.to_string(),
                        status: RunStatus::Cancelled.as_str().to_string(),
                    },
                );
                self.inner.checkpoints.put(&handle.snapshot()).await?;
                tracing::info!(run_id, reason, "run cancelled");
                Ok(handle.run())
            }
            Transition::AlreadyTerminal(_) | Transition::Illegal(_) => Ok(handle.run()),
        }
    }

    /// Waits for the run to reach a terminal status and returns it.
    pub async fn wait_terminal(&self, run_id: &str) -> HubResult<Run> {
        let handle = self
            .inner
            .runs
            .get(run_id)
            .map(|h| h.clone())
            .ok_or_else(|| HubError::run_not_found(run_id))?;
        let mut rx = handle.watch_status();
        loop {
            if rx.borrow().is_terminal() {
                return Ok(handle.run());
            }
            if rx.changed().await.is_err() {
                return Ok(handle.run());
            }
        }
    }

    /// Re-enqueues every non-terminal checkpoint. Call once at startup,
    /// before `start`. Terminal snapshots are skipped.
    pub async fn recover(&self) -> HubResult<usize> {
        let snapshots = self.inner.checkpoints.list_resumable().await?;
        let mut count = 0;
        for snapshot in snapshots {
            if self.inner.runs.contains_key(snapshot.run_id()) {
                continue;
            }
            let agent = match self.inner.registry.get(&snapshot.run.agent_id) {
                Ok(agent) => agent,
                Err(err) => {
                    tracing::warn!(
                        run_id = %snapshot.run_id(),
                        error = %err,
                        "skipping recovery for run with missing agent"
                    );
                    continue;
                }
            };
            let budget = self.inner.budget_for(&agent, &snapshot.run.input);
            let handle = RunHandle::from_snapshot(snapshot, budget);
            handle.clock.pause();
            let run_id = handle.lock().run.run_id.clone();
            self.inner.registry.note_queued(&agent.agent_id, 1);
            self.inner.runs.insert(run_id.clone(), handle);
            self.inner.queue.enqueue(QueueJob::for_run(run_id)).await?;
            count += 1;
        }
        if count > 0 {
            tracing::info!(count, "recovered queued runs from checkpoints");
        }
        Ok(count)
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.queue.depth()
    }
}

#[async_trait]
impl SubRunner for ExecutorInner {
    async fn run_child(&self, input: RunInput, budget: Duration) -> HubResult<Run> {
        let this = self
            .weak_self
            .upgrade()
            .ok_or_else(|| HubError::internal("executor shut down"))?;
        let agent = this.validate_input(&input).await?;
        let budget = budget.min(this.budget_for(&agent, &input));
        let run = Run::new(input);
        let handle = RunHandle::new(run, budget);
        handle.clock.pause();
        let run_id = handle.lock().run.run_id.clone();
        this.runs.insert(run_id.clone(), handle.clone());
        this.checkpoints.put(&handle.snapshot()).await?;
        // driven inline on the caller's worker: no queue hop, no pool slot
        this.drive_run(handle.clone()).await;
        Ok(handle.run())
    }
}

impl ExecutorInner {
    async fn worker_loop(inner: Arc<Self>, worker_id: usize) {
        tracing::debug!(worker_id, "worker started");
        loop {
            tokio::select! {
                _ = inner.shutdown.cancelled() => {
                    tracing::debug!(worker_id, "worker stopping");
                    return;
                }
                claim = inner.queue.claim(inner.config.lease_ttl) => {
                    inner.drive_claim(claim).await;
                }
            }
        }
    }

    async fn drive_claim(self: &Arc<Self>, claim: QueueClaim) {
        let run_id = claim.job.run_id.clone();
        let Some(handle) = self.runs.get(&run_id).map(|h| h.clone()) else {
            let _ = self.queue.ack(&claim).await;
            return;
        };
        if handle.status().is_terminal() {
            self.registry.note_queued(&handle.lock().run.agent_id, -1);
            let _ = self.queue.ack(&claim).await;
            return;
        }
        // lease redelivery while another worker is still driving
        if handle.driving.swap(true, Ordering::AcqRel) {
            let _ = self.queue.ack(&claim).await;
            return;
        }

        let agent_id = handle.lock().run.agent_id.clone();
        match self.registry.try_begin_run(&agent_id) {
            Ok((agent, permit)) => {
                self.registry.note_queued(&agent_id, -1);
                let _ = self.queue.ack(&claim).await;
                self.drive_gated(handle, agent, Some(permit)).await;
            }
            Err(err) if err.context.contains_key("max_concurrent_runs") => {
                // at capacity: stay queued, retry shortly
                handle.driving.store(false, Ordering::Release);
                let _ = self.queue.ack(&claim).await;
                let inner = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let _ = inner.queue.enqueue(QueueJob::for_run(run_id)).await;
                });
            }
            Err(err) => {
                self.registry.note_queued(&agent_id, -1);
                let _ = self.queue.ack(&claim).await;
                self.fail_run(&handle, err).await;
            }
        }
    }

    /// Drives a run that has not yet acquired its concurrency slot.
    async fn drive_run(self: &Arc<Self>, handle: Arc<RunHandle>) {
        let agent_id = handle.lock().run.agent_id.clone();
        match self.registry.try_begin_run(&agent_id) {
            Ok((agent, permit)) => self.drive_gated(handle, agent, Some(permit)).await,
            Err(err) => self.fail_run(&handle, err).await,
        }
    }

    /// The per-run control flow once gated: context materialization, routing,
    /// supervised handler execution, terminal bookkeeping.
    async fn drive_gated(
        self: &Arc<Self>,
        handle: Arc<RunHandle>,
        agent: Agent,
        permit: Option<RunPermit>,
    ) {
        let started = Instant::now();
        let outcome = self.prepare_and_supervise(&handle, &agent).await;
        let latency = started.elapsed().as_millis() as u64;
        let run_id = handle.lock().run.run_id.clone();

        let success = match outcome {
            Ok(Supervised::Finished(Ok(output))) => {
                self.complete_run(&handle, output).await
            }
            Ok(Supervised::Finished(Err(err))) => {
                if err.code == ErrorCode::RunCancelled {
                    // usually cancel() already set the terminal status; a
                    // handler racing the deadline can get here first
                    if !handle.status().is_terminal() {
                        let expired = handle
                            .clock
                            .remaining()
                            .map(|r| r.is_zero())
                            .unwrap_or(false);
                        if expired {
                            self.timeout_run(&handle).await;
                        } else {
                            self.fail_run(&handle, err).await;
                        }
                    }
                    false
                } else {
                    self.fail_run(&handle, err).await;
                    false
                }
            }
            Ok(Supervised::DeadlineExceeded) => {
                self.timeout_run(&handle).await;
                false
            }
            Ok(Supervised::Cancelled) => false,
            Err(err) => {
                self.fail_run(&handle, err).await;
                false
            }
        };
        if let Some(permit) = permit {
            permit.finish(success, latency);
        }
        tracing::info!(
            run_id = %run_id,
            status = handle.status().as_str(),
            latency_ms = latency,
            "run finished"
        );
    }

    async fn prepare_and_supervise(
        self: &Arc<Self>,
        handle: &Arc<RunHandle>,
        agent: &Agent,
    ) -> HubResult<Supervised> {
        let input = handle.lock().run.input.clone();
        let run_id = handle.lock().run.run_id.clone();

        // thread context + prompt materialization
        let mut prompt: Vec<ThreadMessage> = Vec::new();
        let mut thread_context = None;
        if let Some(thread_id) = &input.thread_id {
            let budget = input
                .options
                .context_budget_tokens
                .unwrap_or_else(|| agent.capabilities.max_context_tokens.max(4096));
            let policy = ContextPolicy {
                strategy: input.options.context_strategy.unwrap_or_default(),
                ..Default::default()
            };
            let window = self.threads.get_context(thread_id, budget, &policy).await?;
            if input.messages.is_empty() {
                prompt.extend(window.messages.iter().cloned());
            }
            handle.lock().thread_cursor = window.messages.last().map(|m| m.seq);
            thread_context = Some(window);

            // caller-supplied messages join the log (idempotent per attempt)
            for (index, message) in input.messages.iter().enumerate() {
                let mut message = message.clone();
                message.idempotency_key = Some(format!("{run_id}:{index}"));
                let stored = self.threads.append(thread_id, message).await?;
                handle.lock().thread_cursor = Some(stored.seq);
            }
        }
        let base_seq = prompt.last().map(|m| m.seq).unwrap_or(0);
        for (offset, message) in input.messages.iter().enumerate() {
            prompt.push(ThreadMessage {
                seq: base_seq + offset as u64 + 1,
                role: message.role,
                content: message.content.clone(),
                metadata: message.metadata.clone(),
                created_at: chrono::Utc::now(),
            });
        }

        let decision = self
            .router
            .route(&input, agent)
            .ok_or_else(|| {
                HubError::new(
                    ErrorCode::RunExecutionFailed,
                    "no suitable handler for input",
                )
                .with_context("agent_id", agent.agent_id.clone())
            })?;
        tracing::debug!(
            run_id = %run_id,
            handler = %decision.handler.metadata().name,
            confidence = decision.confidence,
            reason = %decision.reason,
            "routed"
        );
        handle.lock().current_handler = Some(decision.handler.metadata().name.clone());

        match handle.transition(RunStatus::Running) {
            Transition::Applied(_) => {}
            Transition::AlreadyTerminal(_) => return Ok(Supervised::Cancelled),
            Transition::Illegal(current) => {
                return Err(HubError::internal(format!(
                    "run {run_id} cannot start from {current:?}"
                )))
            }
        }
        handle.clock.resume();
        handle.publish(
            &self.bus,
            RunEvent::RunStarted {
                run_id: run_id.clone(),
                agent_id: agent.agent_id.clone(),
                thread_id: input.thread_id.clone(),
            },
        );
        self.checkpoints.put(&handle.snapshot()).await?;

        let ctx = ExecutionContext::new(
            handle.clone(),
            agent.clone(),
            thread_context,
            prompt,
            ContextSeams {
                threads: self.threads.clone(),
                bus: self.bus.clone(),
                interrupts: self.interrupts.clone(),
                checkpoints: self.checkpoints.clone(),
                llm: self.llm.clone(),
                tools: self.tools.clone(),
                knowledge: self.knowledge.clone(),
                sub_runner: {
                    let dyn_self: Arc<dyn SubRunner> = self.clone();
                    let weak: Weak<dyn SubRunner> = Arc::downgrade(&dyn_self);
                    weak
                },
            },
        );
        Ok(self.supervise(handle, &ctx, decision.handler).await)
    }

    /// Runs the handler under the checkpoint ticker, the deadline clock, and
    /// the abort token. The grace window applies after either signal.
    async fn supervise(
        &self,
        handle: &Arc<RunHandle>,
        ctx: &ExecutionContext,
        handler: Arc<dyn crate::handler::StepHandler>,
    ) -> Supervised {
        let handler_fut = handler.execute(ctx);
        tokio::pin!(handler_fut);
        let mut ticker = tokio::time::interval(self.config.checkpoint_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                out = &mut handler_fut => return Supervised::Finished(out),
                _ = ticker.tick() => {
                    let _ = self.checkpoints.put(&handle.snapshot()).await;
                }
                _ = handle.clock.expired() => {
                    tracing::warn!(run_id = %handle.lock().run.run_id, "deadline reached, aborting");
                    handle.cancel.cancel();
                    return match tokio::time::timeout(self.config.grace, &mut handler_fut).await {
                        // the handler returned within grace, but the deadline already decided
                        Ok(_) => Supervised::DeadlineExceeded,
                        Err(_) => {
                            tracing::warn!(
                                run_id = %handle.lock().run.run_id,
                                "handler ignored abort, force-terminating"
                            );
                            Supervised::DeadlineExceeded
                        }
                    };
                }
                _ = handle.cancel.cancelled() => {
                    // external cancellation; give the handler the grace window
                    let _ = tokio::time::timeout(self.config.grace, &mut handler_fut).await;
                    return Supervised::Cancelled;
                }
            }
        }
    }

    /// Completed: output assembled from the handler contribution and the
    /// aggregated token usage.
    async fn complete_run(self: &Arc<Self>, handle: &Arc<RunHandle>, output: HandlerOutput) -> bool {
        let response = output.response.clone();
        match handle.transition_with(RunStatus::Completed, |state| {
            let duration_ms = state
                .run
                .started_at
                .map(|s| (chrono::Utc::now() - s).num_milliseconds().max(0) as u64)
                .unwrap_or(0);
            state.run.output = Some(RunOutput {
                response: output.response.clone(),
                data: output.data.clone(),
                artifacts: output.artifacts.clone(),
                usage: state.token_usage,
                duration_ms,
            });
        }) {
            Transition::Applied(_) => {}
            Transition::AlreadyTerminal(_) | Transition::Illegal(_) => return false,
        }
        let (run_id, thread_id, usage) = {
            let state = handle.lock();
            (
                state.run.run_id.clone(),
                state.run.thread_id.clone(),
                state.token_usage,
            )
        };
        // the assistant reply joins the conversation log
        if let (Some(thread_id), Some(response)) = (&thread_id, &response) {
            let message = NewMessage {
                role: MessageRole::Assistant,
                content: response.clone(),
                metadata: Default::default(),
                idempotency_key: Some(format!("{run_id}:response")),
            };
            if let Err(err) = self.threads.append(thread_id, message).await {
                tracing::warn!(run_id = %run_id, error = %err, "failed to append reply to thread");
            }
        }
        handle.publish_terminal(
            &self.bus,
            RunEvent::Completed {
                run_id,
                response,
                usage: serde_json::to_value(usage).ok().filter(|v| !v.is_null()),
            },
        );
        let _ = self.checkpoints.put(&handle.snapshot()).await;
        true
    }

    async fn fail_run(self: &Arc<Self>, handle: &Arc<RunHandle>, err: HubError) {
        match handle.transition_with(RunStatus::Failed, |state| {
            state.run.error = Some(RunErrorInfo::from(&err));
        }) {
            Transition::Applied(_) => {}
            Transition::AlreadyTerminal(_) | Transition::Illegal(_) => return,
        }
        let run_id = handle.lock().run.run_id.clone();
        self.interrupts.cancel_for_run(&run_id);
        handle.publish_terminal(
            &self.bus,
            RunEvent::Error {
                run_id: run_id.clone(),
                code: err.code.as_str().to_string(),
                message: err.message.clone(),
                status: RunStatus::Failed.as_str().to_string(),
            },
        );
        let _ = self.checkpoints.put(&handle.snapshot()).await;
        tracing::warn!(run_id = %run_id, code = %err.code, message = %err.message, "run failed");
    }

    async fn timeout_run(self: &Arc<Self>, handle: &Arc<RunHandle>) {
        match handle.transition_with(RunStatus::Timeout, |state| {
            state.run.error = Some(RunErrorInfo {
                code: ErrorCode::RunTimeout.as_str().to_string(),
                message: "run deadline exceeded".to_string(),
                retryable: false,
            });
        }) {
            Transition::Applied(_) => {}
            Transition::AlreadyTerminal(_) | Transition::Illegal(_) => return,
        }
        let run_id = handle.lock().run.run_id.clone();
        self.interrupts.cancel_for_run(&run_id);
        handle.publish_terminal(
            &self.bus,
            RunEvent::Error {
                run_id,
                code: ErrorCode::RunTimeout.as_str().to_string(),
                message: "run deadline exceeded".to_string(),
                status: RunStatus::Timeout.as_str().to_string(),
            },
        );
        let _ = self.checkpoints.put(&handle.snapshot()).await;
    }

    /// Submission-time validation: agent exists, thread (if any) is active,
    /// input is non-empty.
    async fn validate_input(&self, input: &RunInput) -> HubResult<Agent> {
        let agent = self.registry.get(&input.agent_id)?;
        if let Some(thread_id) = &input.thread_id {
            let thread = self.threads.get(thread_id).await?;
            if thread.status != ThreadStatus::Active {
                return Err(HubError::thread_closed(thread_id));
            }
            if thread.agent_id != input.agent_id {
                return Err(HubError::invalid(format!(
                    "thread {thread_id} belongs to agent {}",
                    thread.agent_id
                )));
            }
        }
        if input.messages.is_empty() && input.payload.is_empty() && input.thread_id.is_none() {
            return Err(HubError::invalid("run input has no messages, payload, or thread"));
        }
        for message in &input.messages {
            if message.content.trim().is_empty() {
                return Err(HubError::invalid("message content must not be empty"));
            }
        }
        Ok(agent)
    }

    /// Deadline budget: lesser of the caller's and the agent's timeout,
    /// bounded by the process-wide ceiling.
    fn budget_for(&self, agent: &Agent, input: &RunInput) -> Duration {
        let agent_ms = match agent.extensions.default_timeout_ms {
            0 => self.config.default_timeout.as_millis() as u64,
            ms => ms,
        };
        let ms = input
            .options
            .timeout_ms
            .map(|caller| caller.min(agent_ms))
            .unwrap_or(agent_ms);
        Duration::from_millis(ms).min(self.config.max_timeout)
    }
}
