//! Planner - decomposes a task into a dependency-ordered plan.
//!
//! # Algorithm
//! 1. Classify complexity (see [`Complexity`])
//! 2. Select subtask types from the tier catalogue plus task keywords
//! 3. Wire dependencies into a DAG
//! 4. On re-planning, insert corrective subtasks ahead of the subtasks the
//!    last verification blamed, and grow every estimate by the safety margin
//! 5. Choose the execution strategy from the resulting graph

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use crate::agents::leaf::complexity::{select_kinds, Complexity};
use crate::agents::{Agent, AgentId, AgentKind, PlanningError};
use crate::config::{ComplexityThresholds, Config, DurationTable};
use crate::task::{
    IssueKind, Plan, PlanError, Strategy, SubTask, SubtaskKind, Task, VerificationResult,
};

/// What the planner learns from a rejected attempt.
#[derive(Debug, Clone)]
pub struct FailureContext {
    /// The plan that was executed and rejected
    pub previous: Plan,

    /// Why it was rejected
    pub verification: VerificationResult,
}

/// Corrective step inserted for an issue kind: (subtask type, title prefix).
fn corrective_for(issue: IssueKind) -> Option<(SubtaskKind, &'static str)> {
    match issue {
        IssueKind::ExecutionFailed | IssueKind::Timeout => {
            Some((SubtaskKind::Setup, "Retry with backoff"))
        }
        IssueKind::LowQuality => Some((SubtaskKind::Design, "Quality review")),
        IssueKind::LowAccuracy => Some((SubtaskKind::Analysis, "Requirements re-check")),
        IssueKind::Performance => Some((SubtaskKind::Optimization, "Profile")),
        // Skips are fixed by fixing their root cause; aggregate rates carry
        // no subtask to correct.
        IssueKind::UpstreamFailed | IssueKind::ErrorRate | IssueKind::NoResults => None,
    }
}

/// A subtask before ids are assigned.
#[derive(Debug)]
struct Draft {
    key: usize,
    kind: SubtaskKind,
    title: String,
    description: String,
    deps: Vec<usize>,
    /// Depends on every other subtask of the plan (documentation)
    depends_on_all: bool,
    corrective: bool,
}

#[derive(Debug, Default)]
struct Drafts {
    items: Vec<Draft>,
    next_key: usize,
}

impl Drafts {
    fn push(
        &mut self,
        kind: SubtaskKind,
        title: String,
        description: String,
        deps: Vec<usize>,
    ) -> usize {
        let key = self.next_key;
        self.next_key += 1;
        self.items.push(Draft {
            key,
            kind,
            title,
            description,
            deps,
            depends_on_all: false,
            corrective: false,
        });
        key
    }

    fn get_mut(&mut self, key: usize) -> Option<&mut Draft> {
        self.items.iter_mut().find(|d| d.key == key)
    }

    /// Keys of the planned (non-corrective) subtasks of `kind`, in plan order.
    fn planned_of(&self, kind: SubtaskKind) -> Vec<usize> {
        self.items
            .iter()
            .filter(|d| d.kind == kind && !d.corrective)
            .map(|d| d.key)
            .collect()
    }

    /// Insert a corrective draft ahead of every planned subtask of `target`.
    ///
    /// The corrective inherits the first target's prerequisites and every
    /// target gains a dependency on it, so the graph stays acyclic.
    fn insert_corrective(
        &mut self,
        target: SubtaskKind,
        kind: SubtaskKind,
        title: String,
        description: String,
    ) {
        let targets = self.planned_of(target);
        let Some(&first) = targets.first() else {
            return;
        };
        let Some(position) = self.items.iter().position(|d| d.key == first) else {
            return;
        };

        let key = self.next_key;
        self.next_key += 1;
        let deps = self.items[position].deps.clone();
        self.items.insert(
            position,
            Draft {
                key,
                kind,
                title,
                description,
                deps,
                depends_on_all: false,
                corrective: true,
            },
        );

        for t in targets {
            if let Some(draft) = self.get_mut(t) {
                draft.deps.push(key);
            }
        }
    }
}

/// Builds plans from tasks.
#[derive(Debug, Clone)]
pub struct Planner {
    id: AgentId,
    complexity: ComplexityThresholds,
    durations: DurationTable,
    safety_margin: f64,
}

impl Planner {
    pub fn new(config: &Config) -> Self {
        Self {
            id: AgentId::new(),
            complexity: config.complexity.clone(),
            durations: config.durations.clone(),
            safety_margin: config.replan_safety_margin,
        }
    }

    /// Complexity tier the planner assigns to `task`.
    pub fn complexity(&self, task: &Task) -> Complexity {
        Complexity::classify(task, &self.complexity)
    }

    /// Produce a plan for `task`, or a new revision when `failure` is given.
    ///
    /// # Postconditions
    /// - The plan is valid (acyclic, non-empty, known dependencies)
    /// - On re-planning, `revision == previous.revision() + 1`, every subtask
    ///   is a fresh instance, and the total estimate is at least
    ///   `previous.total_estimated() * safety_margin`
    ///
    /// # Errors
    /// - `NoRequirements` if the task has no requirements
    /// - `UnresolvableCycle` if the previous plan contains a dependency cycle
    /// - `InvalidPlan` if the previous plan is otherwise malformed
    /// - `EstimateOverflow` if the scaled estimates no longer fit a `Duration`
    pub fn plan(
        &self,
        task: &Task,
        failure: Option<&FailureContext>,
    ) -> Result<Plan, PlanningError> {
        if task.requirements().is_empty() {
            return Err(PlanningError::NoRequirements(task.id()));
        }

        let revision = match failure {
            Some(ctx) => {
                ctx.previous.validate().map_err(|e| match e {
                    PlanError::CircularDependency { .. } => PlanningError::UnresolvableCycle(e),
                    other => PlanningError::InvalidPlan(other),
                })?;
                let previous = ctx.previous.revision();
                previous
                    .checked_add(1)
                    .ok_or(PlanningError::EstimateOverflow { revision: previous })?
            }
            None => 0,
        };

        let tier = self.complexity(task);
        let mut drafts = decompose(task, tier);
        if let Some(ctx) = failure {
            apply_correctives(&mut drafts, task, ctx);
        }

        let estimates = self.estimate(&drafts, revision, failure)?;
        let subtasks = materialize(task, drafts, estimates);
        let strategy = if tier == Complexity::Simple {
            Strategy::Sequential
        } else {
            Strategy::classify(&subtasks)
        };

        let plan = Plan::new(task.id(), subtasks, strategy, revision)
            .map_err(PlanningError::InvalidPlan)?;

        tracing::info!(
            task_id = %task.id(),
            revision,
            complexity = %tier,
            subtasks = plan.subtasks().len(),
            strategy = %plan.strategy(),
            "Plan ready, estimated {:?}",
            plan.total_estimated()
        );
        Ok(plan)
    }
}

impl Planner {
    /// Per-draft estimates for `revision`: `duration * margin^revision`,
    /// raised to `previous_total * margin` when re-planning.
    fn estimate(
        &self,
        drafts: &Drafts,
        revision: u32,
        failure: Option<&FailureContext>,
    ) -> Result<Vec<Duration>, PlanningError> {
        let overflow = || PlanningError::EstimateOverflow { revision };
        let exponent = i32::try_from(revision).map_err(|_| overflow())?;
        let scale = self.safety_margin.powi(exponent);

        let mut estimates = drafts
            .items
            .iter()
            .map(|d| {
                Duration::try_from_secs_f64(self.durations.secs(d.kind) * scale)
                    .map_err(|_| overflow())
            })
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(ctx) = failure {
            let floor = ctx.previous.total_estimated().as_secs_f64() * self.safety_margin;
            let floor = Duration::try_from_secs_f64(floor).map_err(|_| overflow())?;
            floor_total(&mut estimates, floor).ok_or_else(overflow)?;
        }

        // Plan totals are summed without saturation.
        checked_sum(&estimates).ok_or_else(overflow)?;
        Ok(estimates)
    }
}

impl Agent for Planner {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Planner
    }

    fn description(&self) -> &str {
        "Decomposes tasks into dependency-ordered subtask plans"
    }
}

fn decompose(task: &Task, tier: Complexity) -> Drafts {
    let kinds = select_kinds(task, tier);
    let title = task.title();
    let requirements = task.requirements().join("; ");
    let mut drafts = Drafts::default();

    let analysis = drafts.push(
        SubtaskKind::Analysis,
        format!("Analyze requirements for {}", title),
        format!("Requirements: {}", requirements),
        vec![],
    );

    let design = kinds.contains(&SubtaskKind::Design).then(|| {
        drafts.push(
            SubtaskKind::Design,
            format!("Design solution for {}", title),
            format!("Architecture and interfaces for: {}", task.description()),
            vec![analysis],
        )
    });

    let setup = kinds.contains(&SubtaskKind::Setup).then(|| {
        drafts.push(
            SubtaskKind::Setup,
            format!("Prepare environment for {}", title),
            "Tooling, configuration and environment variables".to_string(),
            vec![analysis],
        )
    });

    let implementation_deps = vec![design.unwrap_or(analysis)];
    let implementation = if tier.splits_implementation() {
        vec![
            drafts.push(
                SubtaskKind::Implementation,
                format!("Implement core of {}", title),
                format!("Core logic covering: {}", requirements),
                implementation_deps.clone(),
            ),
            drafts.push(
                SubtaskKind::Implementation,
                format!("Implement interfaces of {}", title),
                "Public interfaces and adapters".to_string(),
                implementation_deps,
            ),
        ]
    } else {
        vec![drafts.push(
            SubtaskKind::Implementation,
            format!("Implement {}", title),
            format!("Deliver: {}", task.expected_output()),
            implementation_deps,
        )]
    };

    if kinds.contains(&SubtaskKind::Integration) {
        let mut deps = implementation.clone();
        deps.extend(setup);
        drafts.push(
            SubtaskKind::Integration,
            format!("Integrate {}", title),
            "Connect modules and external services, verify data flow".to_string(),
            deps,
        );
    }

    let testing = drafts.push(
        SubtaskKind::Testing,
        format!("Test {}", title),
        "Unit and integration tests with coverage report".to_string(),
        implementation,
    );

    if kinds.contains(&SubtaskKind::Optimization) {
        drafts.push(
            SubtaskKind::Optimization,
            format!("Optimize {}", title),
            "Profile and remove bottlenecks".to_string(),
            vec![testing],
        );
    }

    if kinds.contains(&SubtaskKind::Documentation) {
        let key = drafts.push(
            SubtaskKind::Documentation,
            format!("Document {}", title),
            "Introduction, installation and usage guides".to_string(),
            vec![],
        );
        if let Some(draft) = drafts.get_mut(key) {
            draft.depends_on_all = true;
        }
    }

    drafts
}

fn apply_correctives(drafts: &mut Drafts, task: &Task, ctx: &FailureContext) {
    // (target type, corrective type, title prefix) -> issue descriptions
    let mut wanted: BTreeMap<(SubtaskKind, SubtaskKind, &'static str), Vec<String>> =
        BTreeMap::new();

    for issue in &ctx.verification.issues {
        let Some((kind, label)) = corrective_for(issue.kind) else {
            continue;
        };
        let Some(target) = issue
            .subtask_id
            .and_then(|id| ctx.previous.get(id))
            .map(SubTask::kind)
        else {
            continue;
        };
        wanted
            .entry((target, kind, label))
            .or_default()
            .push(issue.description.clone());
    }

    for ((target, kind, label), causes) in wanted {
        tracing::debug!(
            task_id = %task.id(),
            %target,
            %kind,
            "Inserting corrective step: {}",
            label
        );
        drafts.insert_corrective(
            target,
            kind,
            format!("{} before {} of {}", label, target, task.title()),
            format!("Addresses: {}", causes.join("; ")),
        );
    }
}

/// Raise estimates so their sum is at least `floor`.
/// Scale `estimates` up so they sum to at least `floor`.
///
/// Returns `None` if a scaled estimate or the total leaves the `Duration`
/// range.
fn floor_total(estimates: &mut [Duration], floor: Duration) -> Option<()> {
    let total = checked_sum(estimates)?;
    if total >= floor || total.is_zero() {
        return Some(());
    }

    let factor = floor.as_secs_f64() / total.as_secs_f64();
    for e in estimates.iter_mut() {
        *e = Duration::try_from_secs_f64(e.as_secs_f64() * factor).ok()?;
    }

    // Absorb rounding so the floor holds exactly.
    let total = checked_sum(estimates)?;
    if let (Some(last), true) = (estimates.last_mut(), total < floor) {
        *last = last.checked_add(floor - total)?;
    }
    Some(())
}

fn checked_sum(estimates: &[Duration]) -> Option<Duration> {
    estimates
        .iter()
        .try_fold(Duration::ZERO, |acc, e| acc.checked_add(*e))
}

fn materialize(task: &Task, drafts: Drafts, estimates: Vec<Duration>) -> Vec<SubTask> {
    let bare: Vec<SubTask> = drafts
        .items
        .iter()
        .zip(&estimates)
        .map(|(d, estimate)| {
            SubTask::new(
                task.id(),
                d.kind,
                d.title.clone(),
                d.description.clone(),
                *estimate,
            )
        })
        .collect();

    let ids: HashMap<usize, _> = drafts
        .items
        .iter()
        .zip(&bare)
        .map(|(d, s)| (d.key, s.id()))
        .collect();
    let all: BTreeSet<_> = ids.values().copied().collect();

    bare.into_iter()
        .zip(drafts.items)
        .map(|(subtask, draft)| {
            if draft.depends_on_all {
                let deps: Vec<_> = all
                    .iter()
                    .copied()
                    .filter(|id| *id != subtask.id())
                    .collect();
                subtask.with_dependencies(deps)
            } else {
                let deps: Vec<_> = draft
                    .deps
                    .iter()
                    .filter_map(|k| ids.get(k).copied())
                    .collect();
                subtask.with_dependencies(deps)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Issue, Priority, Severity, SubtaskId, VerificationId};

    fn task(priority: Priority, requirements: &[&str]) -> Task {
        Task::new(
            "User management",
            "Manage users of the platform",
            priority,
            requirements.iter().map(|s| s.to_string()).collect(),
            "working service",
        )
        .unwrap()
    }

    fn failing_verification(issues: Vec<Issue>) -> VerificationResult {
        VerificationResult {
            id: VerificationId::for_results(&[]),
            result_ids: vec![],
            quality_score: 0.5,
            accuracy_score: 0.5,
            error_rate: 0.5,
            issues,
            recommendations: vec![],
            passed: false,
        }
    }

    #[test]
    fn test_medium_task_yields_small_sequential_plan() {
        let planner = Planner::new(&Config::default());
        let t = task(
            Priority::Medium,
            &[
                "User registration form",
                "Password reset flow",
                "Role based permissions",
                "Audit trail of changes",
            ],
        );

        assert_eq!(planner.complexity(&t), Complexity::Medium);
        let plan = planner.plan(&t, None).unwrap();
        assert!((3..=5).contains(&plan.subtasks().len()));
        assert!(matches!(plan.strategy(), Strategy::Sequential | Strategy::Hybrid));
        assert!(plan.validate().is_ok());
        assert_eq!(plan.revision(), 0);
    }

    #[test]
    fn test_keyword_heavy_medium_task_stays_small() {
        let planner = Planner::new(&Config::default());
        let t = Task::new(
            "Rapid docs portal",
            "Setup a cached webhook interface with low latency",
            Priority::Medium,
            vec![
                "Deploy to staging".to_string(),
                "External API client".to_string(),
                "Performance budget".to_string(),
                "README for operators".to_string(),
            ],
            "portal",
        )
        .unwrap();

        assert_eq!(planner.complexity(&t), Complexity::Medium);
        let plan = planner.plan(&t, None).unwrap();
        assert!((3..=5).contains(&plan.subtasks().len()));
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_no_requirements_is_a_planning_error() {
        let planner = Planner::new(&Config::default());
        let t = task(Priority::Low, &[]);
        let err = planner.plan(&t, None).unwrap_err();
        assert_eq!(err, PlanningError::NoRequirements(t.id()));
    }

    #[test]
    fn test_complex_plan_dependencies() {
        let planner = Planner::new(&Config::default());
        let t = task(Priority::Low, &["a", "b", "c", "d", "e", "f"]);
        let plan = planner.plan(&t, None).unwrap();

        let of = |kind| -> Vec<&SubTask> {
            plan.subtasks().iter().filter(|s| s.kind() == kind).collect()
        };
        let implementation = of(SubtaskKind::Implementation);
        assert_eq!(implementation.len(), 2);

        let testing = of(SubtaskKind::Testing)[0];
        assert!(implementation.iter().all(|i| testing.depends_on(i.id())));

        let integration = of(SubtaskKind::Integration)[0];
        let setup = of(SubtaskKind::Setup)[0];
        assert!(integration.depends_on(setup.id()));

        let documentation = of(SubtaskKind::Documentation)[0];
        assert_eq!(documentation.dependencies().len(), plan.subtasks().len() - 1);
        assert_eq!(plan.strategy(), Strategy::Hybrid);
    }

    #[test]
    fn test_replan_inserts_corrective_ahead_of_failed_subtask() {
        let planner = Planner::new(&Config::default());
        let t = task(Priority::Medium, &["a", "b", "c"]);
        let first = planner.plan(&t, None).unwrap();
        let failed = first
            .subtasks()
            .iter()
            .find(|s| s.kind() == SubtaskKind::Implementation)
            .unwrap();

        let issue = Issue::new(IssueKind::ExecutionFailed, Severity::High, "boom")
            .for_subtask(failed.id(), failed.kind());
        let ctx = FailureContext {
            previous: first.clone(),
            verification: failing_verification(vec![issue]),
        };
        let second = planner.plan(&t, Some(&ctx)).unwrap();

        assert_eq!(second.revision(), 1);
        assert_eq!(second.subtasks().len(), first.subtasks().len() + 1);

        let corrective = second
            .subtasks()
            .iter()
            .find(|s| s.title().starts_with("Retry with backoff"))
            .unwrap();
        assert_eq!(corrective.kind(), SubtaskKind::Setup);

        let position = |id: SubtaskId| {
            second
                .subtasks()
                .iter()
                .position(|s| s.id() == id)
                .unwrap()
        };
        let implementation = second
            .subtasks()
            .iter()
            .find(|s| s.kind() == SubtaskKind::Implementation)
            .unwrap();
        assert!(implementation.depends_on(corrective.id()));
        assert!(position(corrective.id()) < position(implementation.id()));

        // Fresh instances only.
        let old: BTreeSet<_> = first.subtasks().iter().map(|s| s.id()).collect();
        assert!(second.subtasks().iter().all(|s| !old.contains(&s.id())));
    }

    #[test]
    fn test_replanning_never_decreases_estimates() {
        let planner = Planner::new(&Config::default());
        let t = task(Priority::High, &["a", "b", "c", "d", "e"]);
        let mut plan = planner.plan(&t, None).unwrap();

        for _ in 0..4 {
            let ctx = FailureContext {
                previous: plan.clone(),
                verification: failing_verification(vec![Issue::new(
                    IssueKind::ErrorRate,
                    Severity::Critical,
                    "too many failures",
                )]),
            };
            let next = planner.plan(&t, Some(&ctx)).unwrap();
            assert!(next.total_estimated() > plan.total_estimated());
            assert!(next.total_estimated() >= plan.total_estimated().mul_f64(1.2));
            plan = next;
        }
        assert_eq!(plan.revision(), 4);
    }

    #[test]
    fn test_cyclic_failure_context_is_unresolvable() {
        let planner = Planner::new(&Config::default());
        let t = task(Priority::Low, &["a"]);
        let a = SubTask::new(t.id(), SubtaskKind::Analysis, "a", "", Duration::from_secs(1));
        let b = SubTask::new(t.id(), SubtaskKind::Testing, "b", "", Duration::from_secs(1))
            .with_dependency(a.id());
        let a = a.with_dependency(b.id());
        let ctx = FailureContext {
            previous: Plan::unchecked(t.id(), vec![a, b], Strategy::Sequential, 0),
            verification: failing_verification(vec![]),
        };

        let err = planner.plan(&t, Some(&ctx)).unwrap_err();
        assert!(matches!(err, PlanningError::UnresolvableCycle(_)));
    }

    #[test]
    fn test_floor_total_absorbs_rounding() {
        let mut estimates = vec![Duration::from_secs(1), Duration::from_secs(2)];
        let floor = Duration::from_secs_f64(10.000_000_001);
        assert_eq!(floor_total(&mut estimates, floor), Some(()));
        assert!(estimates.iter().sum::<Duration>() >= floor);
    }

    #[test]
    fn test_runaway_revisions_fail_instead_of_overflowing() {
        let planner = Planner::new(&Config::default());
        let t = task(Priority::Low, &["a"]);
        let verification = failing_verification(vec![Issue::new(
            IssueKind::ErrorRate,
            Severity::Critical,
            "too many failures",
        )]);

        // 1.2^301 scales a half-hour estimate past the largest Duration.
        let analysis = SubTask::new(t.id(), SubtaskKind::Analysis, "a", "", Duration::from_secs(60));
        let ctx = FailureContext {
            previous: Plan::unchecked(t.id(), vec![analysis], Strategy::Sequential, 300),
            verification: verification.clone(),
        };
        let err = planner.plan(&t, Some(&ctx)).unwrap_err();
        assert_eq!(err, PlanningError::EstimateOverflow { revision: 301 });

        // Revision numbers beyond i32 are rejected, not truncated.
        let analysis = SubTask::new(t.id(), SubtaskKind::Analysis, "a", "", Duration::from_secs(60));
        let ctx = FailureContext {
            previous: Plan::unchecked(t.id(), vec![analysis], Strategy::Sequential, u32::MAX),
            verification: verification.clone(),
        };
        let err = planner.plan(&t, Some(&ctx)).unwrap_err();
        assert_eq!(err, PlanningError::EstimateOverflow { revision: u32::MAX });

        // A huge previous total cannot be raised by the margin.
        let huge = Duration::from_secs(u64::MAX / 10 * 9);
        let analysis = SubTask::new(t.id(), SubtaskKind::Analysis, "a", "", huge);
        let ctx = FailureContext {
            previous: Plan::unchecked(t.id(), vec![analysis], Strategy::Sequential, 0),
            verification,
        };
        let err = planner.plan(&t, Some(&ctx)).unwrap_err();
        assert_eq!(err, PlanningError::EstimateOverflow { revision: 1 });
    }

    #[test]
    fn test_unvalidated_huge_durations_fail_instead_of_panicking() {
        let mut config = Config::default();
        config.durations = DurationTable::uniform(1e30);
        let planner = Planner::new(&config);
        let t = task(Priority::Low, &["a"]);
        let err = planner.plan(&t, None).unwrap_err();
        assert_eq!(err, PlanningError::EstimateOverflow { revision: 0 });
    }
}
