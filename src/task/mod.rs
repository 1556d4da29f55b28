//! Task module - tasks, subtasks, plans and the results flowing between stages.
//!
//! This module holds no orchestration logic:
//! - All types use algebraic data types with exhaustive matching
//! - Invariants are documented and enforced in constructors
//! - Status transitions are crate-private; only the coordinator drives them

pub mod task;
mod subtask;
mod plan;
mod execution;
mod verification;
mod outcome;

pub use task::{Priority, Task, TaskError, TaskId, TaskStatus};
pub use subtask::{SubTask, SubtaskId, SubtaskKind, SubtaskStatus};
pub use plan::{Plan, PlanError, PlanId, Strategy};
pub use execution::{Artifact, ExecutionResult, ExecutionResultId, TIMED_OUT, UPSTREAM_FAILED};
pub use verification::{Issue, IssueKind, Severity, VerificationId, VerificationResult};
pub use outcome::{Attempt, FailureReason, Outcome};
