//! The central execution loop: validate, init, run, finalize, with
//! `tracing` events at each transition. Dispatch is a ready-queue plus
//! tag-aware admission plus a `pending_retries` min-heap rather than
//! running whole topological phases in lockstep, since a saturated tag
//! must not block a task whose *other* tags are free — something a phase
//! barrier can't express.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;
use tracing::{info, warn};

use crate::cache::Cache;
use crate::error::{ConstructionError, ErrorDescriptor, ErrorKind, UnknownFunction};
use crate::fingerprint::fingerprint;
use crate::graph::Graph;
use crate::pool::{Completion, ExecutorPool, PoolTask};
use crate::registry::FunctionRegistry;
use crate::retry::RetryPolicy;
use crate::summary::RunSummary;
use crate::types::{TaskOutcome, TaskState, Workflow};

pub struct SchedulerConfig {
    pub global_cap: usize,
    pub tag_limits: HashMap<String, usize>,
    pub default_retry: RetryPolicy,
    pub overall_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            global_cap: num_cpus::get(),
            tag_limits: HashMap::new(),
            default_retry: RetryPolicy::default(),
            overall_timeout: None,
        }
    }
}

struct RunningTask {
    tags: Vec<String>,
    started_at: chrono::DateTime<Utc>,
    attempt: u32,
}

pub struct Scheduler {
    workflow: Workflow,
    graph: Graph,
    pool: Arc<dyn ExecutorPool>,
    cache: Arc<dyn Cache>,
    registry: Arc<FunctionRegistry>,
    config: SchedulerConfig,

    ready: VecDeque<String>,
    in_flight: HashMap<String, RunningTask>,
    tag_counts: HashMap<String, usize>,
    pending_retries: BinaryHeap<Reverse<(TokioInstant, String)>>,
    attempts_used: HashMap<String, u32>,

    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,

    summary: RunSummary,
}

impl Scheduler {
    /// Fails with `UnknownFunction` or `CycleError` up front (rather than
    /// lazily at dispatch) so an unresolvable `function_ref` or a cyclic
    /// graph keeps the run from ever starting.
    pub fn new(
        workflow: Workflow,
        pool: Arc<dyn ExecutorPool>,
        cache: Arc<dyn Cache>,
        registry: Arc<FunctionRegistry>,
        config: SchedulerConfig,
    ) -> Result<Self, ConstructionError> {
        for spec in workflow.tasks.values() {
            if registry.get(&spec.function_ref).is_none() {
                return Err(UnknownFunction(spec.function_ref.clone()).into());
            }
        }

        let graph = Graph::build(&workflow)?;
        let deps = workflow
            .tasks
            .iter()
            .map(|(id, spec)| (id.clone(), spec.deps.clone()))
            .collect();
        let summary = RunSummary::new(workflow.name.clone()).with_deps(deps);
        let (tx, rx) = mpsc::unbounded_channel();

        Ok(Self {
            workflow,
            graph,
            pool,
            cache,
            registry,
            config,
            ready: VecDeque::new(),
            in_flight: HashMap::new(),
            tag_counts: HashMap::new(),
            pending_retries: BinaryHeap::new(),
            attempts_used: HashMap::new(),
            tx,
            rx,
            summary,
        })
    }

    /// Run the workflow to completion and return the accumulated summary.
    /// Never fails except through `InternalError`-class invariant
    /// violations — individual task failures are recorded in the summary,
    /// not surfaced as an `Err` here.
    pub async fn run(mut self) -> RunSummary {
        info!(workflow = %self.workflow.name, "run.start");

        for id in self.graph.initial_ready() {
            self.ready.push_back(id);
        }

        let deadline = self.config.overall_timeout.map(|d| TokioInstant::now() + d);
        let mut timed_out = false;

        loop {
            self.promote_due_retries();
            self.dispatch();

            if self.graph.all_terminal() {
                break;
            }

            if let Some(deadline) = deadline {
                if TokioInstant::now() >= deadline {
                    timed_out = true;
                    break;
                }
            }

            if !self.await_progress(deadline).await {
                timed_out = true;
                break;
            }
        }

        if timed_out {
            self.cancel_remaining().await;
        }

        self.pool.shutdown(!timed_out).await;
        info!(workflow = %self.workflow.name, "run.end");
        self.summary
    }

    /// Move any `pending_retries` entries whose backoff has elapsed into
    /// `ready`, in wake-time order (ties broken by task id, since the heap
    /// key is `(wake_time, id)`).
    fn promote_due_retries(&mut self) {
        let now = TokioInstant::now();
        while let Some(Reverse((wake_at, _))) = self.pending_retries.peek() {
            if *wake_at > now {
                break;
            }
            let Reverse((_, id)) = self.pending_retries.pop().unwrap();
            self.graph.set_state(&id, TaskState::Ready);
            info!(task_id = %id, "task.retry");
            self.ready.push_back(id);
        }
    }

    /// Admit and dispatch as many ready tasks as the global cap and
    /// per-tag caps allow. A task blocked only on tag saturation is left
    /// in place in `ready` rather than removed, so it's reconsidered on
    /// the next loop iteration without losing its queue position.
    fn dispatch(&mut self) {
        loop {
            if self.in_flight.len() >= self.config.global_cap {
                return;
            }

            let admit_at = self
                .ready
                .iter()
                .position(|id| self.is_admissible(id));

            let Some(index) = admit_at else { return };
            let task_id = self.ready.remove(index).unwrap();
            self.start_task(task_id);
        }
    }

    fn is_admissible(&self, task_id: &str) -> bool {
        let spec = self.workflow.task(task_id).expect("ready task exists in workflow");
        spec.tags.iter().all(|tag| {
            let limit = self.config.tag_limits.get(tag).copied().unwrap_or(usize::MAX);
            self.tag_counts.get(tag).copied().unwrap_or(0) < limit
        })
    }

    fn start_task(&mut self, task_id: String) {
        let spec = self.workflow.task(&task_id).expect("dispatched task exists").clone();
        for tag in &spec.tags {
            *self.tag_counts.entry(tag.clone()).or_insert(0) += 1;
        }
        let attempt = {
            let counter = self.attempts_used.entry(task_id.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        self.graph.set_state(&task_id, TaskState::Running);
        self.in_flight.insert(
            task_id.clone(),
            RunningTask {
                tags: spec.tags.iter().cloned().collect(),
                started_at: Utc::now(),
                attempt,
            },
        );
        info!(task_id = %task_id, attempt, "task.dispatch");

        let fp = if spec.cacheable {
            match fingerprint(&spec.function_ref, &spec.args) {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "fingerprint failed, running without cache");
                    None
                }
            }
        } else {
            None
        };

        let callable = self
            .registry
            .get(&spec.function_ref)
            .expect("resolved during construction");
        let cache = self.cache.clone();
        let pool = self.pool.clone();
        let tx = self.tx.clone();
        let args = spec.args.clone();
        let timeout = spec.timeout;

        // Cache consult and, on a miss, pool submission both happen off
        // the dispatch loop so `dispatch` itself never blocks.
        tokio::spawn(async move {
            if let Some(key) = &fp {
                if let Some(value) = cache.lookup(key).await {
                    info!(task_id = %task_id, "cache.hit");
                    let _ = tx.send(Completion {
                        task_id,
                        outcome: Ok(value),
                        cached: true,
                    });
                    return;
                }
            }

            let task = PoolTask {
                task_id,
                callable,
                args,
                timeout,
            };
            pool.submit(task, tx).await;
        });
    }

    /// Wait for either the next completion or the next scheduled event
    /// (a retry wake-up or the overall deadline), never busy-looping.
    /// Returns `false` if the overall deadline fired first.
    async fn await_progress(&mut self, deadline: Option<TokioInstant>) -> bool {
        let next_retry = self.pending_retries.peek().map(|Reverse((t, _))| *t);

        let sleep_until = match (next_retry, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };

        match sleep_until {
            Some(when) => {
                tokio::select! {
                    completion = self.rx.recv() => {
                        if let Some(completion) = completion {
                            self.handle_completion(completion).await;
                        }
                        true
                    }
                    _ = tokio::time::sleep_until(when) => {
                        match deadline {
                            Some(d) if TokioInstant::now() >= d => false,
                            _ => true,
                        }
                    }
                }
            }
            None => match self.rx.recv().await {
                Some(completion) => {
                    self.handle_completion(completion).await;
                    true
                }
                None => {
                    warn!("completion channel closed with tasks still outstanding");
                    false
                }
            },
        }
    }

    async fn handle_completion(&mut self, completion: Completion) {
        let Completion { task_id, outcome, cached } = completion;
        let Some(running) = self.in_flight.remove(&task_id) else {
            // Late/duplicate completion (e.g. a cache-hit result arriving
            // after we'd otherwise settled the task). Ignore.
            return;
        };
        for tag in &running.tags {
            if let Some(count) = self.tag_counts.get_mut(tag) {
                *count = count.saturating_sub(1);
            }
        }

        let ended_at = Utc::now();
        let wall_time = (ended_at - running.started_at).to_std().unwrap_or(Duration::ZERO);
        let spec = self.workflow.task(&task_id).expect("completed task exists").clone();

        match outcome {
            Ok(value) => {
                if spec.cacheable && !cached {
                    if let Ok(key) = fingerprint(&spec.function_ref, &spec.args) {
                        self.cache.store(&key, &value).await;
                        info!(task_id = %task_id, "cache.store");
                    }
                }

                let newly_ready = self.graph.mark_succeeded(&task_id);
                for id in newly_ready {
                    self.ready.push_back(id);
                }

                self.summary.record(TaskOutcome {
                    task_id: task_id.clone(),
                    status: TaskState::Succeeded,
                    attempts: if cached { 0 } else { running.attempt },
                    started_at: running.started_at,
                    ended_at,
                    wall_time,
                    result: Some(value),
                    error: None,
                    skip_cause: None,
                    cached,
                });
                info!(task_id = %task_id, attempts = running.attempt, cached, "task.end");
            }
            Err(error) => self.handle_failure(task_id, running, ended_at, wall_time, error).await,
        }
    }

    async fn handle_failure(
        &mut self,
        task_id: String,
        running: RunningTask,
        ended_at: chrono::DateTime<Utc>,
        wall_time: Duration,
        error: ErrorDescriptor,
    ) {
        let spec = self.workflow.task(&task_id).expect("failed task exists").clone();
        let policy = self.config.default_retry.clone().with_max_attempts(spec.retries);
        let retryable = matches!(error.kind, ErrorKind::TaskThrew | ErrorKind::TaskTimeout);

        if retryable && policy.attempts_remaining(running.attempt) {
            let mut rng = rand::thread_rng();
            let delay = policy.delay_for_attempt(running.attempt + 1, &mut rng);
            let wake_at = TokioInstant::now() + delay;
            self.pending_retries.push(Reverse((wake_at, task_id.clone())));
            warn!(task_id = %task_id, attempt = running.attempt, delay_ms = delay.as_millis() as u64, "task.retry.scheduled");
            // Graph state stays `running` until the backoff elapses;
            // `promote_due_retries` flips it to `ready`.
            return;
        }

        let skipped = self.graph.mark_terminal_nonsuccess(&task_id, TaskState::Failed);

        self.summary.record(TaskOutcome {
            task_id: task_id.clone(),
            status: TaskState::Failed,
            attempts: running.attempt,
            started_at: running.started_at,
            ended_at,
            wall_time,
            result: None,
            error: Some(error),
            skip_cause: None,
            cached: false,
        });
        warn!(task_id = %task_id, attempts = running.attempt, "task.end.failed");

        let now = Utc::now();
        for (skip_id, cause) in skipped {
            self.summary.record(TaskOutcome {
                task_id: skip_id.clone(),
                status: TaskState::Skipped,
                attempts: 0,
                started_at: now,
                ended_at: now,
                wall_time: Duration::ZERO,
                result: None,
                error: None,
                skip_cause: Some(cause),
                cached: false,
            });
            info!(task_id = %skip_id, "task.skip");
        }
    }

    /// Overall timeout fired: every non-terminal task (ready, in-flight,
    /// or waiting on a retry) becomes `failed` with an `ErrorKind::Cancelled`
    /// outcome, and no further dispatch happens.
    async fn cancel_remaining(&mut self) {
        warn!(workflow = %self.workflow.name, "run.timeout");
        let now = Utc::now();

        let mut remaining: Vec<String> = self.ready.drain(..).collect();
        remaining.extend(self.in_flight.keys().cloned());
        remaining.extend(self.pending_retries.iter().map(|Reverse((_, id))| id.clone()));
        self.pending_retries.clear();

        for task_id in remaining {
            if self.graph.state(&task_id).is_terminal() {
                continue;
            }
            let attempts = self.attempts_used.get(&task_id).copied().unwrap_or(0);
            let started_at = self
                .in_flight
                .get(&task_id)
                .map(|r| r.started_at)
                .unwrap_or(now);
            let skipped = self.graph.mark_terminal_nonsuccess(&task_id, TaskState::Failed);
            self.summary.record(TaskOutcome {
                task_id: task_id.clone(),
                status: TaskState::Failed,
                attempts,
                started_at,
                ended_at: now,
                wall_time: (now - started_at).to_std().unwrap_or(Duration::ZERO),
                result: None,
                error: Some(ErrorDescriptor::cancelled("overall run timeout exceeded")),
                skip_cause: None,
                cached: false,
            });
            for (skip_id, cause) in skipped {
                self.summary.record(TaskOutcome {
                    task_id: skip_id,
                    status: TaskState::Skipped,
                    attempts: 0,
                    started_at: now,
                    ended_at: now,
                    wall_time: Duration::ZERO,
                    result: None,
                    error: None,
                    skip_cause: Some(cause),
                    cached: false,
                });
            }
        }
        self.in_flight.clear();
    }
}
