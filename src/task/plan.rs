//! Plans: a task's subtasks plus their dependency partial order.
//!
//! # Invariants
//! - `subtasks` is non-empty
//! - Subtask ids are unique and every dependency refers to a subtask of the plan
//! - The dependency graph is acyclic
//! - `total_estimated` equals the sum of subtask estimates

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{SubTask, SubtaskId, TaskId};

/// Unique identifier for a plan revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanId(Uuid);

impl PlanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the subtasks of a plan relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// A single chain: every subtask waits on the previous one
    Sequential,
    /// No dependency edges at all
    Parallel,
    /// Parallel groups joined by sequential barriers
    Hybrid,
}

impl Strategy {
    /// Classify a dependency graph by its shape alone.
    ///
    /// # Returns
    /// - `Sequential` for zero or one subtask, or a single linear chain
    /// - `Parallel` if there are no dependency edges
    /// - `Hybrid` otherwise
    pub fn classify(subtasks: &[SubTask]) -> Self {
        if subtasks.len() <= 1 {
            return Self::Sequential;
        }

        let edges: usize = subtasks.iter().map(|s| s.dependencies().len()).sum();
        if edges == 0 {
            return Self::Parallel;
        }

        let mut dependents: HashMap<SubtaskId, usize> = HashMap::new();
        for s in subtasks {
            for dep in s.dependencies() {
                *dependents.entry(*dep).or_default() += 1;
            }
        }

        let linear = edges == subtasks.len() - 1
            && subtasks.iter().all(|s| s.dependencies().len() <= 1)
            && dependents.values().all(|&n| n <= 1);

        if linear {
            Self::Sequential
        } else {
            Self::Hybrid
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

/// An ordered, partially-ordered set of subtasks for one task revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    id: PlanId,
    task_id: TaskId,
    subtasks: Vec<SubTask>,
    strategy: Strategy,
    total_estimated: Duration,
    revision: u32,
    created_at: DateTime<Utc>,
}

impl Plan {
    /// Create a validated plan.
    ///
    /// # Errors
    /// Returns `Err` if any plan invariant is violated.
    pub fn new(
        task_id: TaskId,
        subtasks: Vec<SubTask>,
        strategy: Strategy,
        revision: u32,
    ) -> Result<Self, PlanError> {
        let plan = Self::unchecked(task_id, subtasks, strategy, revision);
        plan.validate()?;
        Ok(plan)
    }

    /// Create a plan without checking its invariants.
    ///
    /// Plans built this way (or deserialized from elsewhere) may be cyclic;
    /// the executor validates every plan before running it.
    pub fn unchecked(
        task_id: TaskId,
        subtasks: Vec<SubTask>,
        strategy: Strategy,
        revision: u32,
    ) -> Self {
        let total_estimated = subtasks.iter().map(SubTask::estimated).sum();
        Self {
            id: PlanId::new(),
            task_id,
            subtasks,
            strategy,
            total_estimated,
            revision,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> PlanId {
        self.id
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn subtasks(&self) -> &[SubTask] {
        &self.subtasks
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn total_estimated(&self) -> Duration {
        self.total_estimated
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn get(&self, id: SubtaskId) -> Option<&SubTask> {
        self.subtasks.iter().find(|s| s.id() == id)
    }

    /// Check every plan invariant.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.subtasks.is_empty() {
            return Err(PlanError::EmptySubtasks);
        }

        let mut seen = HashSet::with_capacity(self.subtasks.len());
        for s in &self.subtasks {
            if !seen.insert(s.id()) {
                return Err(PlanError::DuplicateSubtask(s.id()));
            }
        }

        for s in &self.subtasks {
            for &dep in s.dependencies() {
                if dep == s.id() {
                    return Err(PlanError::SelfDependency(s.id()));
                }
                if !seen.contains(&dep) {
                    return Err(PlanError::UnknownDependency {
                        subtask: s.id(),
                        dependency: dep,
                    });
                }
            }
        }

        self.execution_order().map(|_| ())
    }

    /// Get execution order respecting dependencies (topological sort).
    ///
    /// Among subtasks that are ready at the same time, the one declared
    /// first in the plan comes first, so the order is deterministic.
    ///
    /// # Returns
    /// Vector of subtask indices in a valid execution order.
    ///
    /// # Errors
    /// Returns `PlanError::CircularDependency` naming the subtasks that
    /// could never become ready.
    pub fn execution_order(&self) -> Result<Vec<usize>, PlanError> {
        let n = self.subtasks.len();
        let index: HashMap<SubtaskId, usize> = self
            .subtasks
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id(), i))
            .collect();

        let mut in_degree = vec![0usize; n];
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, s) in self.subtasks.iter().enumerate() {
            for dep in s.dependencies() {
                // Unknown ids are reported by validate(); here they only block.
                match index.get(dep) {
                    Some(&d) => {
                        adj[d].push(i);
                        in_degree[i] += 1;
                    }
                    None => in_degree[i] += 1,
                }
            }
        }

        // Kahn's algorithm, ready set ordered by plan position.
        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &next in &adj[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() == n {
            Ok(order)
        } else {
            let blocked = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.subtasks[i].id())
                .collect();
            Err(PlanError::CircularDependency { blocked })
        }
    }

    /// Ids of every subtask that transitively depends on `root`.
    pub fn transitive_dependents(&self, root: SubtaskId) -> BTreeSet<SubtaskId> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![root];
        while let Some(current) = frontier.pop() {
            for s in &self.subtasks {
                if s.depends_on(current) && found.insert(s.id()) {
                    frontier.push(s.id());
                }
            }
        }
        found
    }
}

/// Errors in plan construction or validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("Plan has no subtasks")]
    EmptySubtasks,

    #[error("Subtask {0} appears more than once")]
    DuplicateSubtask(SubtaskId),

    #[error("Subtask {0} depends on itself")]
    SelfDependency(SubtaskId),

    #[error("Subtask {subtask} depends on unknown subtask {dependency}")]
    UnknownDependency {
        subtask: SubtaskId,
        dependency: SubtaskId,
    },

    #[error("Circular dependency detected; {} subtask(s) can never run", blocked.len())]
    CircularDependency { blocked: Vec<SubtaskId> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::SubtaskKind;

    fn sub(task: TaskId, kind: SubtaskKind, title: &str) -> SubTask {
        SubTask::new(task, kind, title, "", Duration::from_secs(10))
    }

    #[test]
    fn test_execution_order_is_stable() {
        let t = TaskId::new();
        let a = sub(t, SubtaskKind::Analysis, "a");
        let b = sub(t, SubtaskKind::Design, "b");
        let c = sub(t, SubtaskKind::Implementation, "c").with_dependencies([a.id(), b.id()]);
        let d = sub(t, SubtaskKind::Setup, "d");
        let plan = Plan::new(t, vec![c, a, b, d], Strategy::Hybrid, 0).unwrap();
        assert_eq!(plan.execution_order().unwrap(), vec![1, 2, 0, 3]);
        assert_eq!(plan.total_estimated(), Duration::from_secs(40));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let t = TaskId::new();
        let a = sub(t, SubtaskKind::Analysis, "a");
        let b = sub(t, SubtaskKind::Design, "b").with_dependency(a.id());
        let a = a.with_dependency(b.id());
        let err = Plan::new(t, vec![a, b], Strategy::Sequential, 0).unwrap_err();
        assert!(matches!(err, PlanError::CircularDependency { ref blocked } if blocked.len() == 2));
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let t = TaskId::new();
        let a = sub(t, SubtaskKind::Analysis, "a").with_dependency(SubtaskId::new());
        let err = Plan::new(t, vec![a], Strategy::Sequential, 0).unwrap_err();
        assert!(matches!(err, PlanError::UnknownDependency { .. }));
    }

    #[test]
    fn test_empty_plan_is_rejected() {
        let err = Plan::new(TaskId::new(), vec![], Strategy::Parallel, 0).unwrap_err();
        assert_eq!(err, PlanError::EmptySubtasks);
    }

    #[test]
    fn test_strategy_classification() {
        let t = TaskId::new();
        let a = sub(t, SubtaskKind::Analysis, "a");
        let b = sub(t, SubtaskKind::Design, "b").with_dependency(a.id());
        let c = sub(t, SubtaskKind::Implementation, "c").with_dependency(b.id());
        assert_eq!(
            Strategy::classify(&[a.clone(), b.clone(), c]),
            Strategy::Sequential
        );

        let x = sub(t, SubtaskKind::Setup, "x");
        let y = sub(t, SubtaskKind::Testing, "y");
        assert_eq!(Strategy::classify(&[x, y]), Strategy::Parallel);

        let fan = sub(t, SubtaskKind::Setup, "fan").with_dependency(a.id());
        assert_eq!(Strategy::classify(&[a, b, fan]), Strategy::Hybrid);
    }

    #[test]
    fn test_transitive_dependents() {
        let t = TaskId::new();
        let a = sub(t, SubtaskKind::Analysis, "a");
        let b = sub(t, SubtaskKind::Design, "b").with_dependency(a.id());
        let c = sub(t, SubtaskKind::Testing, "c").with_dependency(b.id());
        let d = sub(t, SubtaskKind::Setup, "d");
        let (a_id, b_id, c_id) = (a.id(), b.id(), c.id());
        let plan = Plan::new(t, vec![a, b, c, d], Strategy::Hybrid, 0).unwrap();
        let deps = plan.transitive_dependents(a_id);
        assert_eq!(deps, BTreeSet::from([b_id, c_id]));
    }
}
