//! Coordinator - drives a task through plan → execute → verify → re-plan.
//!
//! # Responsibilities
//! 1. Own the task's status; no other component moves it
//! 2. Call the planner, executor and verifier in turn, never two at once
//! 3. Feed a failed verification back to the planner until the re-plan budget runs out
//! 4. Record per-stage and per-task metrics
//! 5. Assemble the terminal `Outcome`

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agents::{
    Agent, AgentId, AgentKind, DependencyExecutor, ExecutionError, FailureContext, Planner,
    RunContext, Verifier,
};
use crate::capability::Capability;
use crate::config::Config;
use crate::events::{EventSink, LifecycleEvent};
use crate::metrics::MetricsHandle;
use crate::task::{Attempt, FailureReason, Outcome, Task, TaskStatus, VerificationResult};

/// Capacity of the shared event bus; slow subscribers lag instead of blocking tasks.
const EVENT_BUS_CAPACITY: usize = 1024;

/// Coordinator - the top of the stage pipeline.
///
/// # Task Processing Flow
/// ```text
/// 1. PENDING -> PLANNING           (submission)
/// 2. Planner::plan                 -> PLANNING -> EXECUTING, or FAILED on PlanningError
/// 3. DependencyExecutor::execute   -> EXECUTING -> VERIFYING (partial results included)
/// 4. Verifier::verify              -> VERIFYING -> COMPLETED if passed
/// 5. Otherwise, while replans < max: VERIFYING -> REPLANNING -> PLANNING, back to 2
/// 6. Budget exhausted              -> FAILED with the last verification attached
/// ```
///
/// # Thread Safety
/// Cloning is cheap and clones share stages, capability, metrics and event
/// bus. Each submission gets its own `RunContext`, so independent tasks can
/// run concurrently on clones of one coordinator.
#[derive(Clone)]
pub struct Coordinator {
    id: AgentId,
    config: Arc<Config>,

    // Stages
    planner: Arc<Planner>,
    executor: Arc<DependencyExecutor>,
    verifier: Arc<Verifier>,

    capability: Arc<dyn Capability>,
    metrics: Option<MetricsHandle>,
    bus: broadcast::Sender<LifecycleEvent>,
}

impl Coordinator {
    /// Create a coordinator whose stages are configured from `config`.
    pub fn new(config: Config, capability: Arc<dyn Capability>) -> Self {
        let (bus, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            id: AgentId::new(),
            planner: Arc::new(Planner::new(&config)),
            executor: Arc::new(DependencyExecutor::new(&config)),
            verifier: Arc::new(Verifier::new(&config)),
            config: Arc::new(config),
            capability,
            metrics: None,
            bus,
        }
    }

    /// Record stage and task metrics on `metrics`.
    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> Option<&MetricsHandle> {
        self.metrics.as_ref()
    }

    /// Subscribe to the events of every task submitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.bus.subscribe()
    }

    /// Coordinate `task` to a terminal outcome.
    ///
    /// # Postconditions
    /// - `outcome.status` is `Completed` or `Failed`
    /// - At most `max_replanning_attempts + 1` planning cycles ran
    /// - A task that is not `Pending` fails with `FailureReason::NotPending`
    ///   before any stage runs
    pub async fn submit(&self, task: Task) -> Outcome {
        let ctx = self.context(&task);
        self.run(task, ctx).await
    }

    /// Like [`submit`](Self::submit), but stops between stages once `cancel`
    /// fires. A cancelled task fails with `FailureReason::Cancelled`.
    pub async fn submit_with_cancel(&self, task: Task, cancel: CancellationToken) -> Outcome {
        let ctx = self.context(&task).with_cancel(cancel);
        self.run(task, ctx).await
    }

    /// Run `task` in the background and stream its lifecycle events.
    ///
    /// The stream ends once the task is terminal; the handle yields the outcome.
    pub fn submit_streaming(
        &self,
        task: Task,
    ) -> (mpsc::UnboundedReceiver<LifecycleEvent>, JoinHandle<Outcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = RunContext::new(
            EventSink::new(task.id())
                .with_bus(self.bus.clone())
                .with_stream(tx),
        );
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run(task, ctx).await });
        (rx, handle)
    }

    /// Coordinate several independent tasks concurrently.
    ///
    /// Outcomes are returned in input order.
    pub async fn submit_all(&self, tasks: Vec<Task>) -> Vec<Outcome> {
        futures::future::join_all(tasks.into_iter().map(|task| self.submit(task))).await
    }

    fn context(&self, task: &Task) -> RunContext {
        RunContext::new(EventSink::new(task.id()).with_bus(self.bus.clone()))
    }

    async fn run(&self, mut task: Task, ctx: RunContext) -> Outcome {
        let started = Instant::now();
        let max_replans = self.config.max_replanning_attempts;
        let mut run = Run {
            started,
            replans: 0,
            attempts: Vec::new(),
        };

        tracing::info!(
            task_id = %task.id(),
            priority = %task.priority(),
            "Coordinating task: {}",
            task.title()
        );
        ctx.emit_start(
            AgentKind::Coordinator,
            None,
            format!("Task submitted: {}", task.title()),
            json!({
                "priority": task.priority(),
                "requirements": task.requirements().len(),
            }),
        );
        if task.status() != TaskStatus::Pending {
            let reason = FailureReason::NotPending {
                status: task.status(),
            };
            return self.finish(task, &ctx, run, Err(reason));
        }
        self.advance(&mut task, TaskStatus::Planning);

        let mut failure: Option<FailureContext> = None;
        loop {
            if ctx.is_cancelled() {
                return self.finish(task, &ctx, run, Err(FailureReason::Cancelled));
            }

            // Plan
            let t = Instant::now();
            ctx.emit_start(
                AgentKind::Planner,
                None,
                "Planning",
                json!({ "replans": run.replans }),
            );
            let plan = match self.planner.plan(&task, failure.as_ref()) {
                Ok(plan) => {
                    self.record_stage(AgentKind::Planner, &task, t.elapsed(), true);
                    ctx.emit_success(
                        AgentKind::Planner,
                        None,
                        format!(
                            "Plan revision {} with {} subtask(s)",
                            plan.revision(),
                            plan.subtasks().len()
                        ),
                        json!({
                            "plan_id": plan.id().to_string(),
                            "strategy": plan.strategy(),
                            "estimated_secs": plan.total_estimated().as_secs_f64(),
                        }),
                    );
                    plan
                }
                Err(e) => {
                    self.record_stage(AgentKind::Planner, &task, t.elapsed(), false);
                    tracing::warn!(task_id = %task.id(), "Planning failed: {}", e);
                    ctx.emit_error(
                        AgentKind::Planner,
                        None,
                        "Planning failed",
                        json!({ "error": e.to_string() }),
                    );
                    let reason = FailureReason::Planning {
                        message: e.to_string(),
                    };
                    return self.finish(task, &ctx, run, Err(reason));
                }
            };

            if ctx.is_cancelled() {
                return self.finish(task, &ctx, run, Err(FailureReason::Cancelled));
            }

            // Execute
            self.advance(&mut task, TaskStatus::Executing);
            let t = Instant::now();
            let executed = self
                .executor
                .execute(&plan, self.capability.as_ref(), &ctx)
                .await;
            let results = match executed {
                Ok(results) => {
                    self.record_stage(AgentKind::Executor, &task, t.elapsed(), true);
                    results
                }
                Err(ExecutionError::Cancelled { partial }) => {
                    self.record_stage(AgentKind::Executor, &task, t.elapsed(), false);
                    tracing::info!(
                        task_id = %task.id(),
                        discarded = partial.len(),
                        "Cancelled during execution"
                    );
                    return self.finish(task, &ctx, run, Err(FailureReason::Cancelled));
                }
                Err(e) => {
                    // Non-recoverable capability errors still go through
                    // verification with whatever finished.
                    self.record_stage(AgentKind::Executor, &task, t.elapsed(), false);
                    tracing::warn!(task_id = %task.id(), "Execution stopped: {}", e);
                    ctx.emit_error(
                        AgentKind::Executor,
                        None,
                        "Execution stopped early",
                        json!({
                            "error": e.to_string(),
                            "partial": e.partial_results().len(),
                        }),
                    );
                    e.into_partial_results()
                }
            };

            if ctx.is_cancelled() {
                return self.finish(task, &ctx, run, Err(FailureReason::Cancelled));
            }

            // Verify
            self.advance(&mut task, TaskStatus::Verifying);
            let t = Instant::now();
            ctx.emit_start(
                AgentKind::Verifier,
                None,
                format!("Verifying {} result(s)", results.len()),
                json!({ "results": results.len() }),
            );
            let verification = self.verifier.verify(&results);
            self.record_stage(AgentKind::Verifier, &task, t.elapsed(), verification.passed());
            let detail = json!({
                "verification_id": verification.id.to_string(),
                "quality": verification.quality_score,
                "accuracy": verification.accuracy_score,
                "error_rate": verification.error_rate,
                "issues": verification.issues.len(),
                "worst_severity": verification.worst_severity(),
            });
            if verification.passed() {
                ctx.emit_success(AgentKind::Verifier, None, "Verification passed", detail);
            } else {
                ctx.emit_error(AgentKind::Verifier, None, "Verification failed", detail);
            }

            run.attempts.push(Attempt {
                plan: plan.clone(),
                results,
                verification: verification.clone(),
            });

            if verification.passed() {
                self.advance(&mut task, TaskStatus::Completed);
                return self.finish(task, &ctx, run, Ok(verification));
            }
            if run.replans >= max_replans {
                let reason = FailureReason::RetryBudgetExhausted {
                    replans: run.replans,
                };
                return self.finish(task, &ctx, run, Err(reason));
            }

            // Re-plan
            self.advance(&mut task, TaskStatus::Replanning);
            run.replans += 1;
            tracing::info!(
                task_id = %task.id(),
                replan = run.replans,
                max = max_replans,
                "Verification failed with {} issue(s), re-planning",
                verification.issues.len()
            );
            ctx.emit_replanning(
                format!("Re-planning ({}/{})", run.replans, max_replans),
                json!({
                    "issues": verification
                        .issues
                        .iter()
                        .map(|i| i.to_string())
                        .collect::<Vec<_>>(),
                    "recommendations": &verification.recommendations,
                }),
            );
            self.advance(&mut task, TaskStatus::Planning);
            failure = Some(FailureContext {
                previous: plan,
                verification,
            });
        }
    }

    /// Move `task` along a lifecycle edge.
    fn advance(&self, task: &mut Task, next: TaskStatus) {
        if let Err(e) = task.transition(next) {
            tracing::error!(task_id = %task.id(), "{}", e);
        }
    }

    fn record_stage(&self, agent: AgentKind, task: &Task, elapsed: Duration, success: bool) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_agent(agent, task.id(), elapsed, success);
        }
    }

    fn finish(
        &self,
        mut task: Task,
        ctx: &RunContext,
        run: Run,
        verdict: Result<VerificationResult, FailureReason>,
    ) -> Outcome {
        let elapsed = run.started.elapsed();
        let (status, verification, failure) = match verdict {
            Ok(verification) => (TaskStatus::Completed, Some(verification), None),
            Err(reason) => {
                // A rejected submission never owned the task's lifecycle.
                if !matches!(reason, FailureReason::NotPending { .. }) {
                    self.advance(&mut task, TaskStatus::Failed);
                }
                (TaskStatus::Failed, None, Some(reason))
            }
        };

        if let Some(ref metrics) = self.metrics {
            metrics.record_task(task.id(), status, run.replans, elapsed);
        }

        let detail = json!({
            "status": status,
            "replans": run.replans,
            "attempts": run.attempts.len(),
            "elapsed_ms": elapsed.as_millis() as u64,
        });
        match failure {
            None => {
                tracing::info!(
                    task_id = %task.id(),
                    replans = run.replans,
                    "Task completed in {:?}",
                    elapsed
                );
                ctx.emit_success(AgentKind::Coordinator, None, "Task completed", detail);
            }
            Some(ref reason) => {
                tracing::warn!(
                    task_id = %task.id(),
                    replans = run.replans,
                    "Task failed: {}",
                    reason
                );
                ctx.emit_error(
                    AgentKind::Coordinator,
                    None,
                    format!("Task failed: {}", reason),
                    detail,
                );
            }
        }

        Outcome {
            task_id: task.id(),
            status,
            verification,
            failure,
            replans: run.replans,
            elapsed,
            attempts: run.attempts,
            task,
        }
    }
}

/// Bookkeeping of one submission.
struct Run {
    started: Instant,
    replans: u32,
    attempts: Vec<Attempt>,
}

impl Agent for Coordinator {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Coordinator
    }

    fn description(&self) -> &str {
        "Drives tasks through planning, execution, verification and re-planning"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityError, FnCapability};
    use crate::events::EventKind;
    use crate::metrics::MetricsCollector;
    use crate::task::{Artifact, Priority, SubTask};
    use std::future::Future;

    fn task(requirements: &[&str]) -> Task {
        Task::new(
            "User API",
            "REST API for user management",
            Priority::Medium,
            requirements.iter().map(|r| r.to_string()).collect(),
            "Working API",
        )
        .unwrap()
    }

    fn coordinator<F, Fut>(config: Config, f: F) -> Coordinator
    where
        F: Fn(SubTask) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Artifact, CapabilityError>> + Send + 'static,
    {
        Coordinator::new(config, Arc::new(FnCapability::new("test", f)))
    }

    fn passing() -> Coordinator {
        coordinator(Config::default(), |s: SubTask| async move {
            Ok::<_, CapabilityError>(
                Artifact::new(format!("done: {}", s.title())).with_scores(0.95, 0.95),
            )
        })
    }

    const REQS: [&str; 4] = ["CRUD endpoints", "validation", "auth", "pagination"];

    #[tokio::test]
    async fn test_passing_task_completes_without_replanning() {
        let metrics = MetricsCollector::spawn();
        let coordinator = passing().with_metrics(metrics.clone());

        let outcome = coordinator.submit(task(&REQS)).await;

        assert!(outcome.is_completed());
        assert_eq!(outcome.task.status(), TaskStatus::Completed);
        assert_eq!(outcome.replans, 0);
        assert_eq!(outcome.attempts.len(), 1);
        assert!(outcome.failure.is_none());
        assert_eq!(outcome.verification.as_ref(), outcome.last_verification());

        let snapshot = metrics.snapshot().await.unwrap();
        assert_eq!(snapshot.tasks_completed, 1);
        assert_eq!(snapshot.agents.len(), 3);
    }

    #[tokio::test]
    async fn test_always_failing_capability_exhausts_retry_budget() {
        let config = Config {
            max_replanning_attempts: 3,
            ..Config::default()
        };
        let coordinator = coordinator(config, |_s: SubTask| async {
            Err::<Artifact, _>(CapabilityError::Failed("service unavailable".into()))
        });

        let outcome = coordinator.submit(task(&REQS)).await;

        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(outcome.replans, 3);
        assert_eq!(outcome.attempts.len(), 4);
        assert_eq!(
            outcome.failure,
            Some(FailureReason::RetryBudgetExhausted { replans: 3 })
        );
        assert!(outcome.verification.is_none());
        assert!(!outcome.last_verification().unwrap().passed());

        let revisions: Vec<u32> = outcome.plans().map(|p| p.revision()).collect();
        assert_eq!(revisions, vec![0, 1, 2, 3]);
        let totals: Vec<Duration> = outcome.plans().map(|p| p.total_estimated()).collect();
        assert!(totals.windows(2).all(|w| w[1] > w[0]));
    }

    #[tokio::test]
    async fn test_zero_budget_fails_after_one_cycle() {
        let config = Config {
            max_replanning_attempts: 0,
            ..Config::default()
        };
        let coordinator = coordinator(config, |_s: SubTask| async {
            Err::<Artifact, _>(CapabilityError::Fatal("credentials revoked".into()))
        });

        let outcome = coordinator.submit(task(&REQS)).await;

        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(outcome.replans, 0);
        assert_eq!(outcome.attempts.len(), 1);
        assert!(!outcome.active_results().is_empty());
    }

    #[tokio::test]
    async fn test_planning_error_is_not_retried() {
        let outcome = passing().submit(task(&[])).await;

        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(matches!(outcome.failure, Some(FailureReason::Planning { .. })));
        assert_eq!(outcome.replans, 0);
        assert!(outcome.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();

        let outcome = passing().submit_with_cancel(task(&REQS), token).await;

        assert_eq!(outcome.failure, Some(FailureReason::Cancelled));
        assert_eq!(outcome.task.status(), TaskStatus::Failed);
        assert!(outcome.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_mid_execution_discards_results() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let coordinator = coordinator(Config::default(), move |_s: SubTask| {
            trigger.cancel();
            async { Ok::<_, CapabilityError>(Artifact::new("late").with_scores(1.0, 1.0)) }
        });

        let outcome = coordinator.submit_with_cancel(task(&REQS), token).await;

        assert_eq!(outcome.failure, Some(FailureReason::Cancelled));
        assert!(outcome.attempts.is_empty());
        assert!(outcome.active_results().is_empty());
    }

    #[tokio::test]
    async fn test_streamed_events_are_ordered() {
        let (mut rx, handle) = passing().submit_streaming(task(&REQS));
        let outcome = handle.await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert!(outcome.is_completed());
        assert!(events.iter().all(|e| e.task_id == outcome.task_id));
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, (0..events.len() as u64).collect::<Vec<_>>());

        let first = events.first().unwrap();
        assert_eq!((first.agent, first.kind), (AgentKind::Coordinator, EventKind::Start));
        let last = events.last().unwrap();
        assert_eq!((last.agent, last.kind), (AgentKind::Coordinator, EventKind::Success));
        assert!(events.iter().any(|e| e.agent == AgentKind::Executor && e.subtask_id.is_some()));
    }

    #[tokio::test]
    async fn test_replanning_events_on_bus() {
        let config = Config {
            max_replanning_attempts: 2,
            ..Config::default()
        };
        let coordinator = coordinator(config, |_s: SubTask| async {
            Err::<Artifact, _>(CapabilityError::Failed("flaky".into()))
        });
        let mut bus = coordinator.subscribe();

        let outcome = coordinator.submit(task(&REQS)).await;

        let mut replanning = 0;
        let mut rejected = 0;
        while let Ok(event) = bus.try_recv() {
            if event.kind == EventKind::Replanning {
                replanning += 1;
            }
            if (event.agent, event.kind) == (AgentKind::Verifier, EventKind::Error) {
                rejected += 1;
                assert!(event.detail["worst_severity"].is_string());
            }
        }
        assert_eq!(outcome.replans, 2);
        assert_eq!(replanning, 2);
        assert_eq!(rejected, 3);
    }

    #[tokio::test]
    async fn test_resubmitted_completed_task_is_rejected() {
        let coordinator = passing();
        let first = coordinator.submit(task(&REQS)).await;
        assert!(first.is_completed());

        let outcome = coordinator.submit(first.task).await;

        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(
            outcome.failure,
            Some(FailureReason::NotPending {
                status: TaskStatus::Completed
            })
        );
        assert!(outcome.verification.is_none());
        assert!(outcome.attempts.is_empty());
        assert_eq!(outcome.task.status(), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_task_already_in_flight_is_rejected() {
        let mut t = task(&REQS);
        t.transition(TaskStatus::Planning).unwrap();

        let outcome = passing().submit(t).await;

        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(
            outcome.failure,
            Some(FailureReason::NotPending {
                status: TaskStatus::Planning
            })
        );
        assert_eq!(outcome.replans, 0);
        assert!(outcome.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_unvalidated_huge_durations_fail_the_task() {
        let config = Config {
            durations: crate::config::DurationTable::uniform(1e30),
            ..Config::default()
        };
        let coordinator = coordinator(config, |_s: SubTask| async {
            Ok::<_, CapabilityError>(Artifact::new("unreachable"))
        });

        let outcome = coordinator.submit(task(&REQS)).await;

        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(matches!(outcome.failure, Some(FailureReason::Planning { .. })));
        assert!(outcome.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_submit_all_keeps_input_order() {
        let tasks = vec![task(&REQS), task(&[]), task(&["one requirement"])];
        let ids: Vec<_> = tasks.iter().map(|t| t.id()).collect();

        let outcomes = passing().submit_all(tasks).await;

        let got: Vec<_> = outcomes.iter().map(|o| o.task_id).collect();
        assert_eq!(got, ids);
        assert!(outcomes[0].is_completed());
        assert_eq!(outcomes[1].status, TaskStatus::Failed);
    }
}
