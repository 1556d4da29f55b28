//! Leaf agents - the stage components driven by the coordinator.
//!
//! # Components
//! - `Planner`: decomposes a task into a dependency-ordered plan
//! - `DependencyExecutor`: runs a plan's subtasks through a capability
//! - `Verifier`: scores results and decides pass or fail
//!
//! Planner and verifier are pure; only the executor performs I/O.

pub mod complexity;
pub mod criteria;
mod executor;
mod planner;
mod verifier;

pub use complexity::Complexity;
pub use executor::DependencyExecutor;
pub use planner::{FailureContext, Planner};
pub use verifier::{ResultScore, Verifier, KEEP_STANDARD};
