//! Final outcome of coordinating a task.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ExecutionResult, Plan, Task, TaskId, TaskStatus, VerificationResult};

/// Why a task ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// The planner rejected the task; never retried
    Planning { message: String },
    /// Verification kept failing after every allowed re-plan
    RetryBudgetExhausted { replans: u32 },
    /// The caller cancelled the task between stages
    Cancelled,
    /// The task was submitted in a status other than `Pending`; no stage ran
    NotPending { status: TaskStatus },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planning { message } => write!(f, "planning failed: {}", message),
            Self::RetryBudgetExhausted { replans } => {
                write!(f, "verification still failing after {} re-plan(s)", replans)
            }
            Self::Cancelled => f.write_str("cancelled"),
            Self::NotPending { status } => {
                write!(f, "submitted in status {} instead of PENDING", status)
            }
        }
    }
}

/// One plan → execute → verify cycle.
///
/// Attempts of rejected plans are kept for audit; only the last attempt of
/// an outcome is the active result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub plan: Plan,
    pub results: Vec<ExecutionResult>,
    pub verification: VerificationResult,
}

/// Terminal outcome of a submitted task.
///
/// # Invariants
/// - `status` is `Completed` or `Failed`
/// - `verification.is_some()` iff `status == Completed`
/// - `failure.is_some()` iff `status == Failed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// The accepted verification, present only on success
    pub verification: Option<VerificationResult>,
    pub failure: Option<FailureReason>,
    /// Number of re-planning cycles consumed
    pub replans: u32,
    /// Wall-clock time from submission to the terminal state
    pub elapsed: Duration,
    pub attempts: Vec<Attempt>,
    /// Final snapshot of the task; left untouched when the submission was
    /// rejected with `FailureReason::NotPending`
    pub task: Task,
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// The last verification performed, accepted or not.
    ///
    /// On failure this is the diagnostic carried out of the retry loop.
    pub fn last_verification(&self) -> Option<&VerificationResult> {
        self.attempts.last().map(|a| &a.verification)
    }

    /// Results of the last attempt; earlier attempts are audit-only.
    pub fn active_results(&self) -> &[ExecutionResult] {
        self.attempts
            .last()
            .map(|a| a.results.as_slice())
            .unwrap_or(&[])
    }

    /// Every plan revision produced for the task, oldest first.
    pub fn plans(&self) -> impl Iterator<Item = &Plan> {
        self.attempts.iter().map(|a| &a.plan)
    }
}
