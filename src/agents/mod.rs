//! Agents module - the stages of the plan → execute → verify loop.
//!
//! # Agent Types
//! - **Coordinator**: owns the task state machine and the retry budget
//! - **Planner**: decomposes a task into a plan (leaf)
//! - **DependencyExecutor**: runs the plan through a capability (leaf)
//! - **Verifier**: scores results against thresholds (leaf)
//!
//! # Design Principles
//! - Stages are called directly; there is no shared mutable state between them
//! - Only the coordinator mutates a task's status
//! - Every stage reports progress through the task's [`RunContext`]

mod types;
mod context;
pub mod leaf;
pub mod orchestrator;

pub use types::{AgentId, AgentKind, ExecutionError, PlanningError};
pub use context::RunContext;
pub use leaf::{Complexity, DependencyExecutor, FailureContext, Planner, Verifier};
pub use orchestrator::Coordinator;

/// Base trait for all agents.
///
/// Agents expose their identity; each stage has its own typed entry point
/// (`Planner::plan`, `DependencyExecutor::execute`, `Verifier::verify`)
/// because their inputs have nothing in common.
pub trait Agent: Send + Sync {
    /// Get the unique identifier for this agent.
    fn id(&self) -> &AgentId;

    /// Get the role of this agent.
    fn kind(&self) -> AgentKind;

    /// Get a human-readable description of this agent.
    fn description(&self) -> &str {
        "Generic agent"
    }
}
