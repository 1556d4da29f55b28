//! Core Task type and its lifecycle state machine.
//!
//! # Invariants
//! - `id`, `title`, `description` and `requirements` never change after creation
//! - `status` only moves along the edges of [`TaskStatus::can_transition_to`]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task.
///
/// # Properties
/// - Globally unique within an execution context
/// - Immutable once created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new unique task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-assigned importance of a task.
///
/// Ordered: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Status of a task in its lifecycle.
///
/// # State Machine
/// ```text
/// Pending -> Planning -> Executing -> Verifying -> Completed
///                ^                          |
///                |                          v
///                +------- Replanning <------+
///
/// any non-terminal state -> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Planning,
    Executing,
    Verifying,
    Replanning,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Check if the task is in a terminal state.
    ///
    /// # Property
    /// `is_terminal() => !can_transition_to(x)` for every `x`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is an edge of the lifecycle state machine.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Planning)
            | (Planning, Executing)
            | (Executing, Verifying)
            | (Verifying, Completed)
            | (Verifying, Replanning)
            | (Replanning, Planning) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Planning => "PLANNING",
            Self::Executing => "EXECUTING",
            Self::Verifying => "VERIFYING",
            Self::Replanning => "REPLANNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A high-level unit of work submitted by a caller.
///
/// # Invariants
/// - `title` is non-empty
/// - `updated_at >= created_at`
///
/// # Ownership
/// The caller creates a task; once submitted, only the coordinator moves
/// its status, through the crate-private [`Task::transition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    title: String,
    description: String,
    priority: Priority,
    status: TaskStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    requirements: Vec<String>,
    expected_output: String,
}

impl Task {
    /// Create a new pending task.
    ///
    /// Requirements may be empty here; the planner is the one that rejects
    /// a task it cannot decompose.
    ///
    /// # Errors
    /// Returns `TaskError::EmptyTitle` if `title` is blank.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        priority: Priority,
        requirements: Vec<String>,
        expected_output: impl Into<String>,
    ) -> Result<Self, TaskError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(TaskError::EmptyTitle);
        }

        let now = Utc::now();
        Ok(Self {
            id: TaskId::new(),
            title,
            description: description.into(),
            priority,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            requirements,
            expected_output: expected_output.into(),
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn requirements(&self) -> &[String] {
        &self.requirements
    }

    pub fn expected_output(&self) -> &str {
        &self.expected_output
    }

    /// Move the task to `next`.
    ///
    /// # Errors
    /// Returns `TaskError::InvalidTransition` if `next` is not reachable from
    /// the current status; the status is left untouched in that case.
    pub(crate) fn transition(&mut self, next: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now().max(self.created_at);
        Ok(())
    }
}

/// Errors that can occur during task operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Task title cannot be empty")]
    EmptyTitle,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}
