use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{Capability, CapabilityError};
use crate::task::{Artifact, SubTask, SubtaskKind};

/// Routes subtasks to capabilities by type, with an optional default.
///
/// The registry is itself a [`Capability`], so it can be handed to the
/// executor directly.
#[derive(Default)]
pub struct CapabilityRegistry {
    routes: HashMap<SubtaskKind, Arc<dyn Capability>>,
    fallback: Option<Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that sends every subtask to `capability`.
    pub fn with_default(capability: Arc<dyn Capability>) -> Self {
        Self {
            routes: HashMap::new(),
            fallback: Some(capability),
        }
    }

    /// Route `kind` to `capability`, replacing any previous route.
    pub fn register(&mut self, kind: SubtaskKind, capability: Arc<dyn Capability>) {
        self.routes.insert(kind, capability);
    }

    pub fn set_default(&mut self, capability: Arc<dyn Capability>) {
        self.fallback = Some(capability);
    }

    /// Capability responsible for `kind`, falling back to the default.
    pub fn get(&self, kind: SubtaskKind) -> Option<Arc<dyn Capability>> {
        self.routes
            .get(&kind)
            .cloned()
            .or_else(|| self.fallback.clone())
    }

    /// Kinds with a dedicated route, in catalogue order.
    pub fn routed_kinds(&self) -> Vec<SubtaskKind> {
        SubtaskKind::ALL
            .iter()
            .copied()
            .filter(|k| self.routes.contains_key(k))
            .collect()
    }
}

#[async_trait]
impl Capability for CapabilityRegistry {
    fn name(&self) -> &str {
        "registry"
    }

    async fn perform(&self, subtask: &SubTask) -> Result<Artifact, CapabilityError> {
        match self.get(subtask.kind()) {
            Some(capability) => capability.perform(subtask).await,
            None => Err(CapabilityError::Fatal(format!(
                "no capability registered for {} subtasks",
                subtask.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::FnCapability;
    use crate::task::TaskId;
    use std::time::Duration;

    fn named(name: &'static str) -> Arc<dyn Capability> {
        Arc::new(FnCapability::new(name, move |_s: SubTask| async move {
            Ok(Artifact::new(name))
        }))
    }

    fn subtask(kind: SubtaskKind) -> SubTask {
        SubTask::new(TaskId::new(), kind, "x", "", Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_routes_by_kind_then_default() {
        let mut registry = CapabilityRegistry::with_default(named("default"));
        registry.register(SubtaskKind::Testing, named("tester"));

        let tested = registry.perform(&subtask(SubtaskKind::Testing)).await.unwrap();
        assert_eq!(tested.summary, "tester");

        let other = registry.perform(&subtask(SubtaskKind::Setup)).await.unwrap();
        assert_eq!(other.summary, "default");
        assert_eq!(registry.routed_kinds(), vec![SubtaskKind::Testing]);
    }

    #[tokio::test]
    async fn test_missing_route_is_fatal() {
        let registry = CapabilityRegistry::new();
        let err = registry
            .perform(&subtask(SubtaskKind::Design))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
