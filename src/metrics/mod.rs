//! Metrics collector - append-only log drained by a single aggregator task.
//!
//! The coordinator is the only writer. Writers and readers share a
//! [`MetricsHandle`]; every call is a command on one channel, so appends are
//! never lost and a query observes every append sent before it on the same
//! handle.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::agents::AgentKind;
use crate::task::{TaskId, TaskStatus};

/// One stage invocation by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent: AgentKind,
    pub task_id: TaskId,
    pub duration: Duration,
    pub success: bool,
    pub at: DateTime<Utc>,
}

/// One task reaching its terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub replans: u32,
    pub elapsed: Duration,
    pub at: DateTime<Utc>,
}

/// Entry of the append-only metrics log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricRecord {
    Agent(AgentRecord),
    Task(TaskRecord),
}

/// Aggregate statistics of one agent kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent: AgentKind,
    pub invocations: u64,
    pub successes: u64,
    pub success_rate: f64,
    pub mean_duration: Duration,
}

/// Tasks finished within a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    pub window: Duration,
    pub tasks: u64,
}

impl Throughput {
    pub fn per_minute(&self) -> f64 {
        let minutes = self.window.as_secs_f64() / 60.0;
        if minutes > 0.0 {
            self.tasks as f64 / minutes
        } else {
            0.0
        }
    }
}

/// System-wide summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub tasks_processed: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub success_rate: f64,
    pub mean_completion_time: Duration,
    /// Fraction of tasks that needed at least one re-plan
    pub replanning_rate: f64,
    pub mean_replans: f64,
    pub agents: Vec<AgentStats>,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tasks processed:      {}", self.tasks_processed)?;
        writeln!(
            f,
            "Completed / failed:   {} / {}",
            self.tasks_completed, self.tasks_failed
        )?;
        writeln!(f, "Success rate:         {:.1}%", self.success_rate * 100.0)?;
        writeln!(f, "Mean completion time: {:.2?}", self.mean_completion_time)?;
        writeln!(f, "Re-planning rate:     {:.1}%", self.replanning_rate * 100.0)?;
        write!(f, "Mean re-plans:        {:.2}", self.mean_replans)?;
        for a in &self.agents {
            write!(
                f,
                "\n  {:<11} {:>4} run(s), {:>5.1}% ok, mean {:.2?}",
                a.agent,
                a.invocations,
                a.success_rate * 100.0,
                a.mean_duration
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Metrics aggregator is no longer running")]
    Closed,
}

/// Commands processed by the aggregator, in arrival order.
enum MetricsCommand {
    Append(MetricRecord),
    AgentStats {
        agent: AgentKind,
        respond: oneshot::Sender<Option<AgentStats>>,
    },
    Throughput {
        window: Duration,
        respond: oneshot::Sender<Throughput>,
    },
    Snapshot {
        respond: oneshot::Sender<MetricsSnapshot>,
    },
    Records {
        respond: oneshot::Sender<Vec<MetricRecord>>,
    },
}

#[derive(Default)]
struct AgentTally {
    invocations: u64,
    successes: u64,
    total: Duration,
}

impl AgentTally {
    fn stats(&self, agent: AgentKind) -> AgentStats {
        AgentStats {
            agent,
            invocations: self.invocations,
            successes: self.successes,
            success_rate: ratio(self.successes, self.invocations),
            mean_duration: mean(self.total, self.invocations),
        }
    }
}

/// State owned by the aggregator task.
#[derive(Default)]
struct Aggregator {
    log: Vec<MetricRecord>,
    agents: BTreeMap<AgentKind, AgentTally>,
    tasks: u64,
    completed: u64,
    replanned: u64,
    replans: u64,
    elapsed: Duration,
}

impl Aggregator {
    fn append(&mut self, record: MetricRecord) {
        match &record {
            MetricRecord::Agent(r) => {
                let tally = self.agents.entry(r.agent).or_default();
                tally.invocations += 1;
                tally.successes += u64::from(r.success);
                tally.total += r.duration;
            }
            MetricRecord::Task(r) => {
                self.tasks += 1;
                self.completed += u64::from(r.status == TaskStatus::Completed);
                self.replanned += u64::from(r.replans > 0);
                self.replans += u64::from(r.replans);
                self.elapsed += r.elapsed;
            }
        }
        self.log.push(record);
    }

    fn throughput(&self, window: Duration) -> Throughput {
        let since = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| Utc::now().checked_sub_signed(w));
        let tasks = self
            .log
            .iter()
            .filter(|r| match (r, since) {
                (MetricRecord::Task(t), Some(since)) => t.at >= since,
                (MetricRecord::Task(_), None) => true,
                _ => false,
            })
            .count() as u64;
        Throughput { window, tasks }
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let tasks_processed = self.tasks;
        MetricsSnapshot {
            tasks_processed,
            tasks_completed: self.completed,
            tasks_failed: tasks_processed - self.completed,
            success_rate: ratio(self.completed, tasks_processed),
            mean_completion_time: mean(self.elapsed, tasks_processed),
            replanning_rate: ratio(self.replanned, tasks_processed),
            mean_replans: ratio(self.replans, tasks_processed),
            agents: self
                .agents
                .iter()
                .map(|(agent, tally)| tally.stats(*agent))
                .collect(),
        }
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn mean(total: Duration, count: u64) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(n) => total / n,
        Err(_) => Duration::from_secs_f64(total.as_secs_f64() / count as f64),
    }
}

/// Spawns the aggregator.
pub struct MetricsCollector;

impl MetricsCollector {
    /// Start the aggregator task on the current runtime.
    ///
    /// The task ends when every handle has been dropped.
    pub fn spawn() -> MetricsHandle {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut state = Aggregator::default();
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    MetricsCommand::Append(record) => state.append(record),
                    MetricsCommand::AgentStats { agent, respond } => {
                        let stats = state.agents.get(&agent).map(|t| t.stats(agent));
                        let _ = respond.send(stats);
                    }
                    MetricsCommand::Throughput { window, respond } => {
                        let _ = respond.send(state.throughput(window));
                    }
                    MetricsCommand::Snapshot { respond } => {
                        let _ = respond.send(state.snapshot());
                    }
                    MetricsCommand::Records { respond } => {
                        let _ = respond.send(state.log.clone());
                    }
                }
            }
            tracing::debug!(records = state.log.len(), "Metrics aggregator stopped");
        });
        MetricsHandle { tx }
    }
}

/// Cheap, cloneable access to the aggregator.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    tx: mpsc::UnboundedSender<MetricsCommand>,
}

impl fmt::Debug for MetricsCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Append(_) => "Append",
            Self::AgentStats { .. } => "AgentStats",
            Self::Throughput { .. } => "Throughput",
            Self::Snapshot { .. } => "Snapshot",
            Self::Records { .. } => "Records",
        };
        f.write_str(name)
    }
}

impl MetricsHandle {
    pub(crate) fn record_agent(
        &self,
        agent: AgentKind,
        task_id: TaskId,
        duration: Duration,
        success: bool,
    ) {
        self.append(MetricRecord::Agent(AgentRecord {
            agent,
            task_id,
            duration,
            success,
            at: Utc::now(),
        }));
    }

    pub(crate) fn record_task(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        replans: u32,
        elapsed: Duration,
    ) {
        self.append(MetricRecord::Task(TaskRecord {
            task_id,
            status,
            replans,
            elapsed,
            at: Utc::now(),
        }));
    }

    fn append(&self, record: MetricRecord) {
        if self.tx.send(MetricsCommand::Append(record)).is_err() {
            tracing::warn!("Metrics aggregator stopped; dropping record");
        }
    }

    async fn query<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> MetricsCommand,
    ) -> Result<T, MetricsError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(make(tx)).map_err(|_| MetricsError::Closed)?;
        rx.await.map_err(|_| MetricsError::Closed)
    }

    /// Success rate and mean duration of one agent kind, if it ever ran.
    pub async fn agent_stats(&self, agent: AgentKind) -> Result<Option<AgentStats>, MetricsError> {
        self.query(|respond| MetricsCommand::AgentStats { agent, respond })
            .await
    }

    /// Fraction of finished tasks that completed.
    pub async fn success_rate(&self) -> Result<f64, MetricsError> {
        Ok(self.snapshot().await?.success_rate)
    }

    /// Mean number of re-planning cycles per finished task.
    pub async fn mean_replans(&self) -> Result<f64, MetricsError> {
        Ok(self.snapshot().await?.mean_replans)
    }

    /// Tasks that finished within the trailing `window`.
    pub async fn throughput(&self, window: Duration) -> Result<Throughput, MetricsError> {
        self.query(|respond| MetricsCommand::Throughput { window, respond })
            .await
    }

    pub async fn snapshot(&self) -> Result<MetricsSnapshot, MetricsError> {
        self.query(|respond| MetricsCommand::Snapshot { respond }).await
    }

    /// The full append-only log, oldest first.
    pub async fn records(&self) -> Result<Vec<MetricRecord>, MetricsError> {
        self.query(|respond| MetricsCommand::Records { respond }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_agent_stats() {
        let metrics = MetricsCollector::spawn();
        let task = TaskId::new();
        metrics.record_agent(AgentKind::Executor, task, Duration::from_millis(100), true);
        metrics.record_agent(AgentKind::Executor, task, Duration::from_millis(300), false);

        let stats = metrics.agent_stats(AgentKind::Executor).await.unwrap().unwrap();
        assert_eq!(stats.invocations, 2);
        assert_eq!(stats.success_rate, 0.5);
        assert_eq!(stats.mean_duration, Duration::from_millis(200));
        assert!(metrics.agent_stats(AgentKind::Planner).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_system_rates() {
        let metrics = MetricsCollector::spawn();
        metrics.record_task(TaskId::new(), TaskStatus::Completed, 0, Duration::from_secs(2));
        metrics.record_task(TaskId::new(), TaskStatus::Completed, 2, Duration::from_secs(4));
        metrics.record_task(TaskId::new(), TaskStatus::Failed, 3, Duration::from_secs(6));

        let snapshot = assert_ok!(metrics.snapshot().await);
        assert_eq!(snapshot.tasks_processed, 3);
        assert_eq!(snapshot.tasks_failed, 1);
        assert!((snapshot.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((snapshot.replanning_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((metrics.mean_replans().await.unwrap() - 5.0 / 3.0).abs() < 1e-9);
        assert_eq!(snapshot.mean_completion_time, Duration::from_secs(4));
        assert!(snapshot.to_string().contains("Tasks processed:      3"));
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let metrics = MetricsCollector::spawn();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = metrics.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let elapsed = Duration::from_millis(1);
                    m.record_agent(AgentKind::Verifier, TaskId::new(), elapsed, true);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let stats = metrics.agent_stats(AgentKind::Verifier).await.unwrap().unwrap();
        assert_eq!(stats.invocations, 400);
        assert_eq!(metrics.records().await.unwrap().len(), 400);
    }

    #[tokio::test]
    async fn test_throughput_window() {
        let metrics = MetricsCollector::spawn();
        metrics.record_task(TaskId::new(), TaskStatus::Completed, 0, Duration::from_secs(1));
        metrics.record_agent(AgentKind::Planner, TaskId::new(), Duration::from_millis(1), true);

        let t = metrics.throughput(Duration::from_secs(60)).await.unwrap();
        assert_eq!(t.tasks, 1);
        assert_eq!(t.per_minute(), 1.0);
    }

    #[test]
    fn test_queries_fail_once_aggregator_is_gone() {
        let metrics = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(async { MetricsCollector::spawn() });
        // Dropping the runtime dropped the aggregator task.
        let err = assert_err!(tokio_test::block_on(metrics.snapshot()));
        assert!(matches!(err, MetricsError::Closed));
    }

    #[tokio::test]
    async fn test_empty_snapshot() {
        let metrics = MetricsCollector::spawn();
        let snapshot = metrics.snapshot().await.unwrap();
        assert_eq!(snapshot.tasks_processed, 0);
        assert_eq!(snapshot.success_rate, 0.0);
        assert!(snapshot.agents.is_empty());
    }
}
