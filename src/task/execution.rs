//! Execution results produced by the dependency executor.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{SubTask, SubtaskId, SubtaskKind, SubtaskStatus, TaskId};

/// Cause recorded on results that were never executed.
pub const UPSTREAM_FAILED: &str = "upstream dependency failed";

/// Cause recorded on results whose capability missed its deadline.
pub const TIMED_OUT: &str = "timeout";

/// Unique identifier for an execution result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionResultId(Uuid);

impl ExecutionResultId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ExecutionResultId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionResultId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a capability produced for a subtask.
///
/// `quality` and `accuracy`, when a capability reports them, take precedence
/// over the verifier's type-specific scoring of `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Short human-readable summary
    pub summary: String,

    /// Type-specific payload
    #[serde(default)]
    pub data: serde_json::Value,

    /// Self-reported quality score in [0.0, 1.0]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,

    /// Self-reported accuracy score in [0.0, 1.0]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl Artifact {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_scores(mut self, quality: f64, accuracy: f64) -> Self {
        self.quality = Some(quality);
        self.accuracy = Some(accuracy);
        self
    }
}

/// Outcome of running (or skipping) one subtask in one attempt.
///
/// # Invariants
/// - `success == true` iff `status == Completed`
/// - `error.is_some()` iff `success == false`
/// - `artifact.is_some()` only if `success == true`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: ExecutionResultId,
    pub task_id: TaskId,
    pub subtask_id: SubtaskId,
    /// Snapshot of the subtask's type, used for type-specific scoring
    pub subtask_kind: SubtaskKind,
    /// Snapshot of the subtask's title, used in diagnostics
    pub subtask_title: String,
    /// Snapshot of the subtask's estimate, used for weighting and performance checks
    pub estimated: Duration,
    pub success: bool,
    pub status: SubtaskStatus,
    pub artifact: Option<Artifact>,
    pub error: Option<String>,
    pub elapsed: Duration,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    fn base(subtask: &SubTask, status: SubtaskStatus, elapsed: Duration) -> Self {
        Self {
            id: ExecutionResultId::new(),
            task_id: subtask.task_id(),
            subtask_id: subtask.id(),
            subtask_kind: subtask.kind(),
            subtask_title: subtask.title().to_string(),
            estimated: subtask.estimated(),
            success: status == SubtaskStatus::Completed,
            status,
            artifact: None,
            error: None,
            elapsed,
            timestamp: Utc::now(),
        }
    }

    /// Create a successful result.
    pub fn completed(subtask: &SubTask, artifact: Artifact, elapsed: Duration) -> Self {
        Self {
            artifact: Some(artifact),
            ..Self::base(subtask, SubtaskStatus::Completed, elapsed)
        }
    }

    /// Create a failed result carrying the capability's error.
    pub fn failed(subtask: &SubTask, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::base(subtask, SubtaskStatus::Failed, elapsed)
        }
    }

    /// Create a result for a capability call that missed its deadline.
    pub fn timed_out(subtask: &SubTask, elapsed: Duration) -> Self {
        Self {
            error: Some(TIMED_OUT.to_string()),
            ..Self::base(subtask, SubtaskStatus::TimedOut, elapsed)
        }
    }

    /// Create a result for a subtask that was never run.
    pub fn skipped(subtask: &SubTask) -> Self {
        Self {
            error: Some(UPSTREAM_FAILED.to_string()),
            ..Self::base(subtask, SubtaskStatus::Skipped, Duration::ZERO)
        }
    }

    /// Elapsed time divided by estimated time (0 when nothing was estimated).
    pub fn performance_ratio(&self) -> f64 {
        let estimated = self.estimated.as_secs_f64();
        if estimated <= 0.0 {
            return 0.0;
        }
        self.elapsed.as_secs_f64() / estimated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subtask() -> SubTask {
        SubTask::new(
            TaskId::new(),
            SubtaskKind::Integration,
            "Integrate payments",
            "",
            Duration::from_secs(10),
        )
    }

    #[test]
    fn test_constructors_uphold_invariants() {
        let s = subtask();
        let ok = ExecutionResult::completed(&s, Artifact::new("done"), Duration::from_secs(5));
        assert!(ok.success && ok.error.is_none() && ok.artifact.is_some());

        let failed = ExecutionResult::failed(&s, "boom", Duration::from_secs(1));
        assert!(!failed.success);
        assert_eq!(failed.status, SubtaskStatus::Failed);

        let skipped = ExecutionResult::skipped(&s);
        assert_eq!(skipped.error.as_deref(), Some(UPSTREAM_FAILED));
        assert_eq!(skipped.elapsed, Duration::ZERO);

        let timed_out = ExecutionResult::timed_out(&s, Duration::from_secs(3));
        assert_eq!(timed_out.error.as_deref(), Some(TIMED_OUT));
        assert_eq!(timed_out.subtask_kind, SubtaskKind::Integration);
    }

    #[test]
    fn test_performance_ratio() {
        let s = subtask();
        let r = ExecutionResult::completed(&s, Artifact::new("slow"), Duration::from_secs(25));
        assert!((r.performance_ratio() - 2.5).abs() < 1e-9);
    }
}
