//! Orchestrator - the coordinator driving the plan/execute/verify loop.

mod coordinator;

pub use coordinator::Coordinator;
