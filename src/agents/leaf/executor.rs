//! Dependency executor - runs a plan's subtasks in dependency order.
//!
//! # Scheduling
//! - A subtask is eligible once every dependency completed successfully
//! - Eligible subtasks run concurrently, up to the concurrency limit
//! - Among eligible subtasks, plan order decides who starts first
//! - A failed or timed-out subtask marks all transitive dependents skipped;
//!   independent branches keep running
//!
//! # Halting
//! A non-recoverable capability error or a cancellation stops scheduling.
//! Subtasks already in flight run to completion and their results are kept
//! in the partial result set carried by the error.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;

use crate::agents::{Agent, AgentId, AgentKind, ExecutionError, RunContext};
use crate::capability::{Capability, CapabilityError};
use crate::config::Config;
use crate::task::{Artifact, ExecutionResult, Plan, SubTask, SubtaskId};

/// What happened to one capability call.
enum CallOutcome {
    Done(Result<Artifact, CapabilityError>),
    TimedOut,
}

/// Why scheduling stopped early.
enum Halt {
    Fatal { subtask_id: SubtaskId, cause: String },
    Cancelled,
}

/// Executes plans against a capability.
#[derive(Debug, Clone)]
pub struct DependencyExecutor {
    id: AgentId,
    concurrency_limit: usize,
    timeout: Option<Duration>,
}

impl DependencyExecutor {
    pub fn new(config: &Config) -> Self {
        Self {
            id: AgentId::new(),
            concurrency_limit: config.concurrency_limit.max(1),
            timeout: config.subtask_timeout(),
        }
    }

    pub fn with_limits(concurrency_limit: usize, timeout: Option<Duration>) -> Self {
        Self {
            id: AgentId::new(),
            concurrency_limit: concurrency_limit.max(1),
            timeout,
        }
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Execute every subtask of `plan`.
    ///
    /// # Returns
    /// One result per subtask, in plan order. Subtasks that never ran
    /// because a dependency failed carry a skipped result.
    ///
    /// # Errors
    /// - `InvalidPlan` before anything runs if the plan is malformed or cyclic
    /// - `Capability` when the capability reports a non-recoverable error
    /// - `Cancelled` when the context is cancelled mid-plan
    pub async fn execute(
        &self,
        plan: &Plan,
        capability: &dyn Capability,
        ctx: &RunContext,
    ) -> Result<Vec<ExecutionResult>, ExecutionError> {
        plan.validate()?;

        let subtasks = plan.subtasks();
        let index: HashMap<SubtaskId, usize> = subtasks
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id(), i))
            .collect();

        let mut waiting_on: Vec<usize> =
            subtasks.iter().map(|s| s.dependencies().len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); subtasks.len()];
        for (i, s) in subtasks.iter().enumerate() {
            for dep in s.dependencies() {
                if let Some(&d) = index.get(dep) {
                    dependents[d].push(i);
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..subtasks.len())
            .filter(|&i| waiting_on[i] == 0)
            .collect();
        let mut results: Vec<Option<ExecutionResult>> = vec![None; subtasks.len()];
        let mut in_flight = FuturesUnordered::new();
        let mut halt: Option<Halt> = None;

        tracing::info!(
            task_id = %plan.task_id(),
            revision = plan.revision(),
            subtasks = subtasks.len(),
            limit = self.concurrency_limit,
            "Executing plan"
        );

        loop {
            while halt.is_none() && in_flight.len() < self.concurrency_limit {
                if ctx.is_cancelled() {
                    halt = Some(Halt::Cancelled);
                    break;
                }
                let Some(i) = ready.pop_first() else {
                    break;
                };
                let subtask = &subtasks[i];
                ctx.emit_start(
                    AgentKind::Executor,
                    Some(subtask.id()),
                    format!("Starting {} subtask: {}", subtask.kind(), subtask.title()),
                    json!({
                        "kind": subtask.kind(),
                        "estimated_secs": subtask.estimated().as_secs_f64(),
                    }),
                );
                in_flight.push(self.call(i, subtask, capability));
            }

            let Some((i, outcome, elapsed)) = in_flight.next().await else {
                break;
            };
            let subtask = &subtasks[i];

            match outcome {
                CallOutcome::Done(Ok(artifact)) => {
                    ctx.emit_success(
                        AgentKind::Executor,
                        Some(subtask.id()),
                        format!("Completed: {}", subtask.title()),
                        json!({
                            "elapsed_ms": elapsed.as_millis() as u64,
                            "summary": &artifact.summary,
                        }),
                    );
                    results[i] = Some(ExecutionResult::completed(subtask, artifact, elapsed));
                    for &next in &dependents[i] {
                        waiting_on[next] -= 1;
                        if waiting_on[next] == 0 && results[next].is_none() {
                            ready.insert(next);
                        }
                    }
                }
                CallOutcome::Done(Err(err)) => {
                    tracing::warn!(subtask_id = %subtask.id(), "Subtask failed: {}", err);
                    ctx.emit_error(
                        AgentKind::Executor,
                        Some(subtask.id()),
                        format!("Failed: {}", subtask.title()),
                        json!({ "error": err.to_string(), "fatal": err.is_fatal() }),
                    );
                    results[i] = Some(ExecutionResult::failed(subtask, err.to_string(), elapsed));
                    if let CapabilityError::Fatal(cause) = err {
                        halt.get_or_insert(Halt::Fatal {
                            subtask_id: subtask.id(),
                            cause,
                        });
                    } else {
                        skip_dependents(plan, subtask, &index, &mut results, ctx);
                    }
                }
                CallOutcome::TimedOut => {
                    let after = self.timeout.unwrap_or(elapsed);
                    tracing::warn!(
                        subtask_id = %subtask.id(),
                        "Subtask timed out after {:?}",
                        after
                    );
                    ctx.emit_error(
                        AgentKind::Executor,
                        Some(subtask.id()),
                        format!("Timed out: {}", subtask.title()),
                        json!({
                            "error": crate::task::TIMED_OUT,
                            "after_ms": after.as_millis() as u64,
                        }),
                    );
                    results[i] = Some(ExecutionResult::timed_out(subtask, elapsed));
                    skip_dependents(plan, subtask, &index, &mut results, ctx);
                }
            }
        }

        let collected: Vec<ExecutionResult> = results.into_iter().flatten().collect();
        match halt {
            None => {
                tracing::info!(
                    task_id = %plan.task_id(),
                    succeeded = collected.iter().filter(|r| r.success).count(),
                    total = collected.len(),
                    "Plan executed"
                );
                Ok(collected)
            }
            Some(Halt::Fatal { subtask_id, cause }) => Err(ExecutionError::Capability {
                subtask_id,
                cause,
                partial: collected,
            }),
            Some(Halt::Cancelled) => {
                tracing::info!(task_id = %plan.task_id(), "Execution cancelled");
                Err(ExecutionError::Cancelled { partial: collected })
            }
        }
    }

    /// Run one capability call under the optional deadline.
    async fn call(
        &self,
        i: usize,
        subtask: &SubTask,
        capability: &dyn Capability,
    ) -> (usize, CallOutcome, Duration) {
        let started = Instant::now();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, capability.perform(subtask)).await {
                Ok(result) => CallOutcome::Done(result),
                Err(_) => CallOutcome::TimedOut,
            },
            None => CallOutcome::Done(capability.perform(subtask).await),
        };
        (i, outcome, started.elapsed())
    }
}

impl Agent for DependencyExecutor {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Executor
    }

    fn description(&self) -> &str {
        "Runs plan subtasks in dependency order with bounded concurrency"
    }
}

/// Record a skipped result for every unresolved transitive dependent.
fn skip_dependents(
    plan: &Plan,
    failed: &SubTask,
    index: &HashMap<SubtaskId, usize>,
    results: &mut [Option<ExecutionResult>],
    ctx: &RunContext,
) {
    for id in plan.transitive_dependents(failed.id()) {
        let Some(&j) = index.get(&id) else {
            continue;
        };
        if results[j].is_some() {
            continue;
        }
        let skipped = &plan.subtasks()[j];
        ctx.emit_error(
            AgentKind::Executor,
            Some(skipped.id()),
            format!("Skipped: {}", skipped.title()),
            json!({ "error": crate::task::UPSTREAM_FAILED, "upstream": failed.id() }),
        );
        results[j] = Some(ExecutionResult::skipped(skipped));
    }
}
