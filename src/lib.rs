//! # planloop
//!
//! Plan, execute, verify and re-plan orchestration engine.
//!
//! This library provides:
//! - A planner that decomposes tasks into dependency-ordered subtask plans
//! - A dependency executor that runs plans through a caller-supplied capability
//! - A verifier that scores results and decides pass or fail
//! - A coordinator that loops until verification passes or the re-plan budget runs out
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────────────────────────┐
//!   Task ────▶ │         Coordinator          │ ────▶ Outcome
//!              └──┬──────────┬───────────┬────┘
//!                 │          │           │         events ──▶ subscribers
//!                 ▼          ▼           ▼         metrics ─▶ aggregator
//!             Planner ─▶ Executor ─▶ Verifier
//!                 ▲          │           │
//!                 │      Capability      │
//!                 └──── failure context ─┘
//! ```
//!
//! ## Task Flow
//! 1. Plan the task (or re-plan with the last failed verification)
//! 2. Execute subtasks in dependency order, independent ones concurrently
//! 3. Verify the results against the configured thresholds
//! 4. Accept, or re-plan while the budget allows
//!
//! ## Modules
//! - `task`: tasks, subtasks, plans and the results flowing between stages
//! - `agents`: the stage components and the coordinator
//! - `capability`: the caller-supplied work interface
//! - `events`: lifecycle event stream
//! - `metrics`: append-only metrics aggregator
//! - `config`: engine configuration

pub mod agents;
pub mod capability;
pub mod config;
pub mod events;
pub mod metrics;
pub mod task;

pub use agents::Coordinator;
pub use capability::{Capability, CapabilityError};
pub use config::Config;
pub use metrics::{MetricsCollector, MetricsHandle};
pub use task::{Outcome, Priority, Task, TaskStatus};
