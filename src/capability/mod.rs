//! Capability interface - the caller-supplied work behind every subtask.
//!
//! The engine never does concrete work itself. A capability receives a
//! subtask and returns an [`Artifact`] or an error; the executor turns that
//! into an `ExecutionResult` (timing, ids, skip propagation).
//!
//! # Implementations
//! - [`FnCapability`]: wraps an async closure
//! - [`CapabilityRegistry`]: routes each `SubtaskKind` to its own capability
//! - [`SimulatedCapability`]: produces synthetic type-specific payloads

pub mod registry;
pub mod simulated;

pub use registry::CapabilityRegistry;
pub use simulated::SimulatedCapability;

use std::future::Future;

use async_trait::async_trait;

use crate::task::{Artifact, SubTask};

/// Why a capability could not produce an artifact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// The subtask failed; dependents are skipped, the batch continues
    #[error("{0}")]
    Failed(String),

    /// The capability itself is unusable; the executor stops scheduling
    #[error("non-recoverable: {0}")]
    Fatal(String),
}

impl CapabilityError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Performs the work of one subtask.
///
/// # Invariants
/// - `perform()` never panics; all failures are returned as `Err`
/// - Implementations may be called concurrently for independent subtasks
#[async_trait]
pub trait Capability: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str {
        "capability"
    }

    async fn perform(&self, subtask: &SubTask) -> Result<Artifact, CapabilityError>;
}

/// Capability backed by an async closure.
///
/// The closure receives an owned copy of the subtask.
pub struct FnCapability<F> {
    name: String,
    f: F,
}

impl<F> FnCapability<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> Capability for FnCapability<F>
where
    F: Fn(SubTask) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Artifact, CapabilityError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn perform(&self, subtask: &SubTask) -> Result<Artifact, CapabilityError> {
        (self.f)(subtask.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{SubtaskKind, TaskId};
    use std::time::Duration;

    #[tokio::test]
    async fn test_fn_capability_receives_subtask() {
        let cap = FnCapability::new("echo", |s: SubTask| async move {
            Ok(Artifact::new(s.title().to_uppercase()))
        });
        let subtask = SubTask::new(
            TaskId::new(),
            SubtaskKind::Design,
            "sketch",
            "",
            Duration::from_secs(1),
        );

        let artifact = cap.perform(&subtask).await.unwrap();
        assert_eq!(artifact.summary, "SKETCH");
        assert_eq!(cap.name(), "echo");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(CapabilityError::Fatal("gone".into()).is_fatal());
        assert!(!CapabilityError::Failed("flaky".into()).is_fatal());
    }
}
