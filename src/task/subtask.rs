//! SubTask definitions.
//!
//! A subtask is the minimal unit of work the executor hands to a capability.
//! Subtasks are immutable once the planner creates them; re-planning builds
//! fresh instances instead of editing old ones.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TaskId;

/// Unique identifier for a subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubtaskId(Uuid);

impl SubtaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SubtaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed catalogue of subtask types.
///
/// # Exhaustive Matching
/// Planner, verifier and capability routing all dispatch on this enum;
/// adding a variant is a compile error everywhere it must be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskKind {
    Analysis,
    Design,
    Implementation,
    Testing,
    Documentation,
    Setup,
    Integration,
    Optimization,
}

impl SubtaskKind {
    /// Every kind, in catalogue order.
    pub const ALL: [SubtaskKind; 8] = [
        Self::Analysis,
        Self::Design,
        Self::Implementation,
        Self::Testing,
        Self::Documentation,
        Self::Setup,
        Self::Integration,
        Self::Optimization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Design => "design",
            Self::Implementation => "implementation",
            Self::Testing => "testing",
            Self::Documentation => "documentation",
            Self::Setup => "setup",
            Self::Integration => "integration",
            Self::Optimization => "optimization",
        }
    }
}

impl std::fmt::Display for SubtaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a subtask.
///
/// A `SubTask` always carries the status it was planned with (`Pending`);
/// what happened during execution is recorded on its `ExecutionResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Completed,
    Failed,
    /// Not executed because an upstream dependency failed
    Skipped,
    /// Capability did not answer before the deadline
    TimedOut,
}

/// A planned unit of work.
///
/// # Invariants
/// - `dependencies` never contains `id`
/// - All fields are fixed at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    id: SubtaskId,
    /// Back-reference only; the subtask does not own its task.
    task_id: TaskId,
    title: String,
    description: String,
    kind: SubtaskKind,
    dependencies: BTreeSet<SubtaskId>,
    estimated: Duration,
    status: SubtaskStatus,
}

impl SubTask {
    /// Create a new pending subtask with no dependencies.
    pub fn new(
        task_id: TaskId,
        kind: SubtaskKind,
        title: impl Into<String>,
        description: impl Into<String>,
        estimated: Duration,
    ) -> Self {
        Self {
            id: SubtaskId::new(),
            task_id,
            title: title.into(),
            description: description.into(),
            kind,
            dependencies: BTreeSet::new(),
            estimated,
            status: SubtaskStatus::Pending,
        }
    }

    /// Add a dependency on another subtask.
    ///
    /// Self-dependencies are ignored so the invariant holds by construction.
    pub fn with_dependency(mut self, id: SubtaskId) -> Self {
        if id != self.id {
            self.dependencies.insert(id);
        }
        self
    }

    /// Add multiple dependencies.
    pub fn with_dependencies(self, ids: impl IntoIterator<Item = SubtaskId>) -> Self {
        ids.into_iter().fold(self, |s, id| s.with_dependency(id))
    }

    pub fn id(&self) -> SubtaskId {
        self.id
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> SubtaskKind {
        self.kind
    }

    pub fn dependencies(&self) -> &BTreeSet<SubtaskId> {
        &self.dependencies
    }

    pub fn estimated(&self) -> Duration {
        self.estimated
    }

    pub fn status(&self) -> SubtaskStatus {
        self.status
    }

    /// Whether this subtask waits on `other`.
    pub fn depends_on(&self, other: SubtaskId) -> bool {
        self.dependencies.contains(&other)
    }
}
