//! Execution context handed to step handlers.
//!
//! Bundles the run snapshot, the resolved agent, optional thread context,
//! the abort token, service seams, and the atomic step callbacks. Step
//! mutations are serialized per run; each callback persists a checkpoint.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use run_event::{EnvelopeState, RunEvent};
use serde_json::Value;
use tokio::sync::watch;
// tokio's Instant tracks the runtime clock, so deadlines honor paused test time
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::error::{ErrorCode, HubError, HubResult};
use crate::interrupt::{
    InterruptOutcome, InterruptPayload, InterruptPriority, InterruptService, InterruptSpec,
};
use crate::knowledge::KnowledgeBackend;
use crate::llm::{LlmClient, LlmUsage};
use crate::registry::{Agent, InterruptTimeoutPolicy};
use crate::run::{
    CheckpointStore, ParallelPolicy, Run, RunInput, RunSnapshot, RunStatus, Step, StepKind,
    StepStatus,
};
use crate::thread::{ContextWindow, ThreadMessage, ThreadService};
use crate::tool_source::ToolSource;

/// Deadline bookkeeping that excludes time spent interrupted.
pub(crate) struct DeadlineClock {
    state: Mutex<ClockState>,
}

struct ClockState {
    budget: Duration,
    started: Instant,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl DeadlineClock {
    pub(crate) fn new(budget: Duration) -> Self {
        Self {
            state: Mutex::new(ClockState {
                budget,
                started: Instant::now(),
                paused_at: None,
                paused_total: Duration::ZERO,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn pause(&self) {
        let mut state = self.lock();
        if state.paused_at.is_none() {
            state.paused_at = Some(Instant::now());
        }
    }

    pub(crate) fn resume(&self) {
        let mut state = self.lock();
        if let Some(paused_at) = state.paused_at.take() {
            state.paused_total += paused_at.elapsed();
        }
    }

    /// Remaining budget; `None` while paused (the deadline cannot fire).
    pub(crate) fn remaining(&self) -> Option<Duration> {
        let state = self.lock();
        if state.paused_at.is_some() {
            return None;
        }
        let consumed = state.started.elapsed().saturating_sub(state.paused_total);
        Some(state.budget.saturating_sub(consumed))
    }

    /// Resolves when the (pause-aware) budget is exhausted.
    pub(crate) async fn expired(&self) {
        loop {
            match self.remaining() {
                Some(rem) if rem.is_zero() => return,
                Some(rem) => tokio::time::sleep(rem.min(Duration::from_millis(50))).await,
                // paused: poll until resumed
                None => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    }
}

pub(crate) struct RunState {
    pub(crate) run: Run,
    pub(crate) token_usage: LlmUsage,
    pub(crate) current_handler: Option<String>,
    pub(crate) thread_cursor: Option<u64>,
    pub(crate) attempt: u32,
    /// The enveloped terminal event exactly as published; replayed verbatim
    /// to stream clients that connect after the run finished.
    pub(crate) terminal_event: Option<Value>,
    /// Index into `run.steps` while replaying a recovered run; `None` once live.
    replay_cursor: Option<usize>,
}

pub(crate) enum Transition {
    Applied(RunStatus),
    AlreadyTerminal(RunStatus),
    Illegal(RunStatus),
}

/// Shared mutable state of one run plus its signaling primitives.
pub(crate) struct RunHandle {
    state: Mutex<RunState>,
    pub(crate) cancel: CancellationToken,
    pub(crate) clock: DeadlineClock,
    /// Set by the worker that owns the drive; duplicate queue deliveries
    /// (expired lease) observe it and drop their claim.
    pub(crate) driving: std::sync::atomic::AtomicBool,
    status_tx: watch::Sender<RunStatus>,
    envelope: Mutex<EnvelopeState>,
}

impl RunHandle {
    pub(crate) fn new(run: Run, budget: Duration) -> Arc<Self> {
        let status = run.status;
        let run_id = run.run_id.clone();
        let (status_tx, _) = watch::channel(status);
        Arc::new(Self {
            state: Mutex::new(RunState {
                run,
                token_usage: LlmUsage::default(),
                current_handler: None,
                thread_cursor: None,
                attempt: 0,
                terminal_event: None,
                replay_cursor: None,
            }),
            cancel: CancellationToken::new(),
            clock: DeadlineClock::new(budget),
            driving: std::sync::atomic::AtomicBool::new(false),
            status_tx,
            envelope: Mutex::new(EnvelopeState::new(run_id)),
        })
    }

    /// Rehydrates a handle from a checkpoint: non-terminal steps are dropped
    /// (they retry from their input) and completed steps arm the replay cursor.
    pub(crate) fn from_snapshot(snapshot: RunSnapshot, budget: Duration) -> Arc<Self> {
        let mut run = snapshot.run;
        run.steps.retain(|s| s.status == StepStatus::Completed);
        run.status = RunStatus::Queued;
        let run_id = run.run_id.clone();
        let replay = (!run.steps.is_empty()).then_some(0);
        let (status_tx, _) = watch::channel(run.status);
        Arc::new(Self {
            state: Mutex::new(RunState {
                run,
                token_usage: snapshot.token_usage,
                current_handler: snapshot.current_handler,
                thread_cursor: snapshot.thread_cursor,
                attempt: snapshot.attempt + 1,
                terminal_event: snapshot.terminal_event,
                replay_cursor: replay,
            }),
            cancel: CancellationToken::new(),
            clock: DeadlineClock::new(budget),
            driving: std::sync::atomic::AtomicBool::new(false),
            status_tx,
            envelope: Mutex::new(EnvelopeState::new(run_id)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn run(&self) -> Run {
        self.lock().run.clone()
    }

    pub(crate) fn status(&self) -> RunStatus {
        self.lock().run.status
    }

    pub(crate) fn watch_status(&self) -> watch::Receiver<RunStatus> {
        self.status_tx.subscribe()
    }

    /// Applies a status transition under the run lock. Terminal states are
    /// never overwritten.
    pub(crate) fn transition(&self, to: RunStatus) -> Transition {
        self.transition_with(to, |_| {})
    }

    /// Transition plus a state mutation applied atomically under one lock, so
    /// watchers woken by the status change observe the mutated state.
    pub(crate) fn transition_with(
        &self,
        to: RunStatus,
        mutate: impl FnOnce(&mut RunState),
    ) -> Transition {
        let mut state = self.lock();
        let current = state.run.status;
        if current.is_terminal() {
            return Transition::AlreadyTerminal(current);
        }
        if current != to && !current.can_transition(to) {
            return Transition::Illegal(current);
        }
        state.run.status = to;
        match to {
            RunStatus::Running if state.run.started_at.is_none() => {
                state.run.started_at = Some(Utc::now());
            }
            _ if to.is_terminal() => {
                state.run.completed_at = Some(Utc::now());
            }
            _ => {}
        }
        mutate(&mut state);
        drop(state);
        let _ = self.status_tx.send(to);
        Transition::Applied(current)
    }

    /// Stamps the per-run envelope and publishes; the envelope lock keeps
    /// per-run event order intact across concurrent publishers.
    pub(crate) fn publish(&self, bus: &EventBus, event: RunEvent) {
        let mut envelope = self.envelope.lock().unwrap_or_else(|p| p.into_inner());
        if let Ok(value) = run_event::to_json(&event, &mut envelope) {
            bus.publish(event, value);
        }
    }

    /// Terminal-event variant of [`publish`](Self::publish): the stamped
    /// value is also retained on the run state so late stream subscribers
    /// can replay the exact frame (same `seq`) that live ones received.
    pub(crate) fn publish_terminal(&self, bus: &EventBus, event: RunEvent) {
        let value = {
            let mut envelope = self.envelope.lock().unwrap_or_else(|p| p.into_inner());
            match run_event::to_json(&event, &mut envelope) {
                Ok(value) => value,
                Err(_) => return,
            }
        };
        self.lock().terminal_event = Some(value.clone());
        bus.publish(event, value);
    }

    pub(crate) fn snapshot(&self) -> RunSnapshot {
        let state = self.lock();
        RunSnapshot {
            run: state.run.clone(),
            current_handler: state.current_handler.clone(),
            token_usage: state.token_usage,
            thread_cursor: state.thread_cursor,
            attempt: state.attempt,
            terminal_event: state.terminal_event.clone(),
            updated_at: Utc::now(),
        }
    }
}

/// Drives a child run on behalf of an `agent_call` step.
#[async_trait]
pub(crate) trait SubRunner: Send + Sync {
    async fn run_child(&self, input: RunInput, budget: Duration) -> HubResult<Run>;
}

/// One step as seen by a handler after `add_step`: either freshly started,
/// or replayed from a checkpoint with its recorded output.
#[derive(Clone, Debug)]
pub struct StepGuard {
    pub step: Step,
    /// True when the step completed in a previous attempt; skip the work and
    /// use `step.output`.
    pub replayed: bool,
}

pub(crate) struct ContextSeams {
    pub(crate) threads: ThreadService,
    pub(crate) bus: EventBus,
    pub(crate) interrupts: InterruptService,
    pub(crate) checkpoints: Arc<dyn CheckpointStore>,
    pub(crate) llm: Arc<dyn LlmClient>,
    pub(crate) tools: Arc<dyn ToolSource>,
    pub(crate) knowledge: Arc<dyn KnowledgeBackend>,
    pub(crate) sub_runner: Weak<dyn SubRunner>,
}

/// What a handler executes against.
pub struct ExecutionContext {
    pub(crate) handle: Arc<RunHandle>,
    agent: Agent,
    thread_context: Option<ContextWindow>,
    prompt: Vec<ThreadMessage>,
    seams: ContextSeams,
}

impl ExecutionContext {
    pub(crate) fn new(
        handle: Arc<RunHandle>,
        agent: Agent,
        thread_context: Option<ContextWindow>,
        prompt: Vec<ThreadMessage>,
        seams: ContextSeams,
    ) -> Self {
        Self {
            handle,
            agent,
            thread_context,
            prompt,
            seams,
        }
    }

    /// Current run snapshot.
    pub fn run(&self) -> Run {
        self.handle.run()
    }

    pub fn input(&self) -> RunInput {
        self.handle.lock().run.input.clone()
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn thread_context(&self) -> Option<&ContextWindow> {
        self.thread_context.as_ref()
    }

    /// Materialized prompt: thread context followed by the input messages.
    pub fn prompt_messages(&self) -> &[ThreadMessage] {
        &self.prompt
    }

    /// Child token of the run's abort controller. Handlers must observe it
    /// on every I/O boundary.
    pub fn cancellation(&self) -> CancellationToken {
        self.handle.cancel.child_token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.cancel.is_cancelled()
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.seams.llm
    }

    pub fn tools(&self) -> &Arc<dyn ToolSource> {
        &self.seams.tools
    }

    pub fn knowledge(&self) -> &Arc<dyn KnowledgeBackend> {
        &self.seams.knowledge
    }

    pub fn threads(&self) -> &ThreadService {
        &self.seams.threads
    }

    /// Streaming is on when the caller asked for it and the agent supports it.
    pub fn streaming_enabled(&self) -> bool {
        self.agent.extensions.supports_streaming && self.handle.lock().run.input.options.stream
    }

    /// Moves the run to `streaming` (first token about to flow).
    pub fn begin_streaming(&self) {
        if self.streaming_enabled() {
            self.handle.transition(RunStatus::Streaming);
        }
    }

    /// Publishes one output token when streaming is enabled.
    pub fn emit_token(&self, content: impl Into<String>) {
        if !self.streaming_enabled() {
            return;
        }
        let run_id = self.handle.lock().run.run_id.clone();
        self.handle.publish(
            &self.seams.bus,
            RunEvent::Token {
                run_id,
                content: content.into(),
            },
        );
    }

    pub(crate) fn publish(&self, event: RunEvent) {
        self.handle.publish(&self.seams.bus, event);
    }

    async fn checkpoint(&self) {
        let snapshot = self.handle.snapshot();
        if let Err(err) = self.seams.checkpoints.put(&snapshot).await {
            tracing::warn!(run_id = %snapshot.run.run_id, error = %err, "checkpoint write failed");
        }
    }

    /// Consumes the next replayed step when it matches `(kind, name)`.
    /// Lets a handler skip work that precedes the step record itself (an
    /// interrupt wait, an external side effect) on a recovered run. Returns
    /// `None` when the run is live or the next replayed step differs.
    pub fn take_replayed(&self, kind: StepKind, name: &str) -> Option<Step> {
        let mut state = self.handle.lock();
        let cursor = state.replay_cursor?;
        let step = match state.run.steps.get(cursor) {
            Some(existing) if existing.kind == kind && existing.name == name => existing.clone(),
            _ => return None,
        };
        state.replay_cursor = Some(cursor + 1);
        Some(step)
    }

    /// Creates a step and starts it. On a recovered run this replays the
    /// next completed step instead of creating a new one; check
    /// [`StepGuard::replayed`] and skip the work when set.
    pub async fn add_step(
        &self,
        kind: StepKind,
        name: impl Into<String>,
        input: Value,
    ) -> HubResult<StepGuard> {
        self.add_step_inner(kind, name.into(), input, None, None).await
    }

    async fn add_step_inner(
        &self,
        kind: StepKind,
        name: String,
        input: Value,
        parent_step_id: Option<String>,
        parallel_policy: Option<ParallelPolicy>,
    ) -> HubResult<StepGuard> {
        let (guard, event) = {
            let mut state = self.handle.lock();
            if let Some(cursor) = state.replay_cursor {
                if let Some(existing) = state.run.steps.get(cursor) {
                    if existing.kind == kind && existing.name == name {
                        let step = existing.clone();
                        state.replay_cursor = Some(cursor + 1);
                        return Ok(StepGuard {
                            step,
                            replayed: true,
                        });
                    }
                }
                // divergence from the checkpointed sequence: go live
                state.replay_cursor = None;
            }
            let step = Step {
                step_id: format!("step-{}", Uuid::new_v4()),
                kind,
                name,
                status: StepStatus::Running,
                input,
                output: None,
                error: None,
                tool: None,
                called_agent: None,
                parent_step_id,
                parallel_policy,
                duration_ms: None,
                created_at: Utc::now(),
                completed_at: None,
            };
            let event = RunEvent::StepStarted {
                run_id: state.run.run_id.clone(),
                step_id: step.step_id.clone(),
                name: step.name.clone(),
                step_type: step.kind.as_str().to_string(),
            };
            state.run.steps.push(step.clone());
            (
                StepGuard {
                    step,
                    replayed: false,
                },
                event,
            )
        };
        self.publish(event);
        self.checkpoint().await;
        Ok(guard)
    }

    /// Completes a step with its output or error. Steps never leave a
    /// terminal status.
    pub async fn complete_step(
        &self,
        step_id: &str,
        result: Result<Value, &HubError>,
    ) -> HubResult<Step> {
        let (step, event) = {
            let mut state = self.handle.lock();
            let run_id = state.run.run_id.clone();
            let step = state
                .run
                .steps
                .iter_mut()
                .find(|s| s.step_id == step_id)
                .ok_or_else(|| {
                    HubError::internal(format!("unknown step: {step_id}"))
                })?;
            if step.status.is_terminal() {
                return Err(HubError::internal(format!(
                    "step {step_id} already {:?}",
                    step.status
                )));
            }
            let now = Utc::now();
            step.duration_ms = Some(
                (now - step.created_at).num_milliseconds().max(0) as u64,
            );
            step.completed_at = Some(now);
            match result {
                Ok(output) => {
                    step.status = StepStatus::Completed;
                    step.output = Some(output);
                }
                Err(err) => {
                    step.status = StepStatus::Failed;
                    step.error = Some(format!("{}: {}", err.code, err.message));
                }
            }
            let event = RunEvent::StepCompleted {
                run_id,
                step_id: step.step_id.clone(),
                name: step.name.clone(),
                status: if step.status == StepStatus::Completed {
                    "completed".to_string()
                } else {
                    "failed".to_string()
                },
                duration_ms: step.duration_ms.unwrap_or(0),
            };
            (step.clone(), event)
        };
        self.publish(event);
        self.checkpoint().await;
        Ok(step)
    }

    /// Adds the usage of one model call to the run total.
    pub fn update_token_usage(&self, usage: LlmUsage) {
        self.handle.lock().token_usage.add(usage);
    }

    /// Annotates a step with the tool it calls and publishes `tool:calling`.
    pub fn note_tool_calling(&self, step_id: &str, tool: &str) {
        let run_id = {
            let mut state = self.handle.lock();
            if let Some(step) = state.run.steps.iter_mut().find(|s| s.step_id == step_id) {
                step.tool = Some(tool.to_string());
            }
            state.run.run_id.clone()
        };
        self.publish(RunEvent::ToolCalling {
            run_id,
            step_id: step_id.to_string(),
            tool: tool.to_string(),
        });
    }

    /// Annotates an `agent_call` step with the agent it hands control to.
    pub fn note_called_agent(&self, step_id: &str, agent_id: &str) {
        let mut state = self.handle.lock();
        if let Some(step) = state.run.steps.iter_mut().find(|s| s.step_id == step_id) {
            step.called_agent = Some(agent_id.to_string());
        }
    }

    pub fn note_tool_result(&self, step_id: &str, tool: &str, ok: bool) {
        let run_id = self.handle.lock().run.run_id.clone();
        self.publish(RunEvent::ToolResult {
            run_id,
            step_id: step_id.to_string(),
            tool: tool.to_string(),
            ok,
        });
    }

    /// Suspends the run on an interrupt and waits for its resolution.
    ///
    /// Returns the response value, or `None` when the interrupt expired and
    /// the agent's policy is `continue_without`. Expiry under the default
    /// policy and cancellation surface as errors.
    pub async fn interrupt(
        &self,
        kind: crate::interrupt::InterruptKind,
        priority: InterruptPriority,
        payload: InterruptPayload,
        timeout_ms: u64,
    ) -> HubResult<Option<Value>> {
        if !self.agent.extensions.supports_interrupts {
            return Err(HubError::invalid(format!(
                "agent {} does not support interrupts",
                self.agent.agent_id
            )));
        }
        let (run_id, thread_id) = {
            let state = self.handle.lock();
            (state.run.run_id.clone(), state.run.thread_id.clone())
        };
        let (interrupt, rx) = self.seams.interrupts.create(InterruptSpec {
            run_id: run_id.clone(),
            thread_id,
            agent_id: self.agent.agent_id.clone(),
            kind,
            priority,
            payload,
            timeout_ms,
        })?;

        self.handle.transition(RunStatus::Interrupted);
        self.handle.clock.pause();
        self.publish(RunEvent::Interrupt {
            run_id: run_id.clone(),
            interrupt_id: interrupt.interrupt_id.clone(),
            interrupt_type: kind.as_str().to_string(),
            priority: priority.as_str().to_string(),
            message: interrupt.payload.message.clone(),
        });
        self.publish(RunEvent::RunInterrupted {
            run_id: run_id.clone(),
            interrupt_id: interrupt.interrupt_id.clone(),
        });
        self.checkpoint().await;

        let outcome = match rx.await {
            Ok(outcome) => outcome,
            Err(_) => InterruptOutcome::Cancelled,
        };
        self.handle.clock.resume();

        let (closed_status, result) = match outcome {
            InterruptOutcome::Resolved(value) => {
                self.handle.transition(RunStatus::Running);
                ("resolved", Ok(Some(value)))
            }
            InterruptOutcome::Expired => {
                match self.agent.extensions.on_interrupt_timeout {
                    InterruptTimeoutPolicy::ContinueWithout => {
                        self.handle.transition(RunStatus::Running);
                        ("expired", Ok(None))
                    }
                    InterruptTimeoutPolicy::Fail => (
                        "expired",
                        Err(HubError::new(
                            ErrorCode::InterruptExpired,
                            format!("interrupt {} expired", interrupt.interrupt_id),
                        )
                        .with_context("interrupt_id", interrupt.interrupt_id.clone())),
                    ),
                }
            }
            InterruptOutcome::Cancelled => (
                "cancelled",
                Err(HubError::new(
                    ErrorCode::RunCancelled,
                    format!("run {run_id} cancelled"),
                )),
            ),
        };
        self.publish(RunEvent::InterruptClosed {
            run_id,
            interrupt_id: interrupt.interrupt_id,
            status: closed_status.to_string(),
        });
        self.checkpoint().await;
        result
    }

    /// Runs N children concurrently under one `parallel_execution` parent.
    /// Children share the parent's deadline through the run's abort token.
    /// Strict policy: any child failure fails the parent. Lenient: failed
    /// children are recorded and the parent completes with the rest.
    pub async fn run_parallel(
        &self,
        name: impl Into<String>,
        policy: ParallelPolicy,
        children: Vec<(StepKind, String, Value, BoxFuture<'_, HubResult<Value>>)>,
    ) -> HubResult<Value> {
        let name = name.into();
        let parent = self
            .add_step_inner(
                StepKind::ParallelExecution,
                name,
                Value::from(children.len() as u64),
                None,
                Some(policy),
            )
            .await?;
        if parent.replayed {
            return Ok(parent.step.output.clone().unwrap_or(Value::Null));
        }

        let mut started = Vec::with_capacity(children.len());
        for (kind, child_name, input, fut) in children {
            let guard = self
                .add_step_inner(kind, child_name, input, Some(parent.step.step_id.clone()), None)
                .await?;
            started.push((guard, fut));
        }

        let results = futures::future::join_all(started.into_iter().map(|(guard, fut)| async move {
            if guard.replayed {
                let recorded = guard.step.output.clone().unwrap_or(Value::Null);
                return (guard, Ok(recorded));
            }
            let out = fut.await;
            (guard, out)
        }))
        .await;

        let mut outputs = Vec::new();
        let mut failures = Vec::new();
        for (guard, result) in results {
            match result {
                Ok(value) => {
                    if !guard.replayed {
                        self.complete_step(&guard.step.step_id, Ok(value.clone())).await?;
                    }
                    outputs.push(value);
                }
                Err(err) => {
                    self.complete_step(&guard.step.step_id, Err(&err)).await?;
                    failures.push(serde_json::json!({
                        "step": guard.step.name,
                        "code": err.code.as_str(),
                        "message": err.message,
                    }));
                    if policy == ParallelPolicy::Strict {
                        let parent_err = HubError::new(
                            ErrorCode::RunExecutionFailed,
                            format!("parallel child {} failed: {}", guard.step.name, err.message),
                        );
                        self.complete_step(&parent.step.step_id, Err(&parent_err)).await?;
                        return Err(parent_err);
                    }
                }
            }
        }
        let output = serde_json::json!({
            "results": outputs,
            "failures": failures,
        });
        self.complete_step(&parent.step.step_id, Ok(output.clone())).await?;
        Ok(output)
    }

    /// Invokes a sub-agent as a child run, inheriting the parent's remaining
    /// deadline. Returns the completed child run.
    pub async fn call_agent(&self, input: RunInput) -> HubResult<Run> {
        let runner = self
            .seams
            .sub_runner
            .upgrade()
            .ok_or_else(|| HubError::internal("executor shut down"))?;
        let budget = self
            .handle
            .clock
            .remaining()
            .unwrap_or(Duration::from_millis(0));
        if budget.is_zero() {
            return Err(HubError::new(
                ErrorCode::RunTimeout,
                "no deadline budget left for sub-agent call",
            ));
        }
        runner.run_child(input, budget).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn clock_excludes_paused_time() {
        let clock = DeadlineClock::new(Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(50)).await;
        clock.pause();
        assert!(clock.remaining().is_none());
        tokio::time::advance(Duration::from_millis(500)).await;
        clock.resume();
        let rem = clock.remaining().unwrap();
        assert!(rem >= Duration::from_millis(49), "remaining {rem:?}");
        assert!(rem <= Duration::from_millis(51), "remaining {rem:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn clock_expires_after_budget() {
        let clock = Arc::new(DeadlineClock::new(Duration::from_millis(30)));
        let waiter = {
            let clock = clock.clone();
            tokio::spawn(async move {
                clock.expired().await;
            })
        };
        tokio::time::advance(Duration::from_millis(40)).await;
        waiter.await.unwrap();
        assert_eq!(clock.remaining().unwrap(), Duration::ZERO);
    }
}
