//! Core types for the agent system.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{ExecutionResult, PlanError, SubtaskId, TaskId};

/// Unique identifier for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(Uuid);

impl AgentId {
    /// Create a new unique agent ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of an agent in the plan → execute → verify loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Planner,
    Executor,
    Verifier,
    Coordinator,
}

impl AgentKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Executor => "executor",
            Self::Verifier => "verifier",
            Self::Coordinator => "coordinator",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors raised by the planner.
///
/// Planning errors are fatal for a task: it is never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanningError {
    #[error("Task {0} has no requirements to plan from")]
    NoRequirements(TaskId),

    #[error("Failure context references a dependency cycle that cannot be resolved: {0}")]
    UnresolvableCycle(PlanError),

    #[error("Produced plan is invalid: {0}")]
    InvalidPlan(PlanError),

    #[error("Estimates for plan revision {revision} exceed the representable duration range")]
    EstimateOverflow { revision: u32 },
}

/// Errors raised by the dependency executor.
///
/// Recoverable capability failures never surface here: they become failed
/// `ExecutionResult`s and skip their dependents.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    #[error("Plan rejected before execution: {0}")]
    InvalidPlan(#[from] PlanError),

    #[error("Subtask {subtask_id} failed irrecoverably: {cause}")]
    Capability {
        subtask_id: SubtaskId,
        cause: String,
        partial: Vec<ExecutionResult>,
    },

    #[error("Execution cancelled after {} result(s)", partial.len())]
    Cancelled { partial: Vec<ExecutionResult> },
}

impl ExecutionError {
    /// Results gathered before the error, if any.
    pub fn partial_results(&self) -> &[ExecutionResult] {
        match self {
            Self::Capability { partial, .. } | Self::Cancelled { partial } => partial,
            Self::InvalidPlan(_) => &[],
        }
    }

    pub fn into_partial_results(self) -> Vec<ExecutionResult> {
        match self {
            Self::Capability { partial, .. } | Self::Cancelled { partial } => partial,
            Self::InvalidPlan(_) => Vec::new(),
        }
    }
}
