//! Verification agent - scores a result set and decides pass or fail.
//!
//! # Decision Rule
//! Pass only if aggregate quality and accuracy meet their minimums and the
//! fraction of failed results does not exceed the maximum error rate.
//! Performance issues are recorded independently of the decision.
//!
//! Verification is a pure function of the result set: the same input always
//! yields an identical `VerificationResult`.

use std::collections::BTreeSet;

use crate::agents::leaf::criteria::{clamp_unit, criteria, score_artifact, FindingArea};
use crate::agents::{Agent, AgentId, AgentKind};
use crate::config::{Config, VerificationThresholds};
use crate::task::{
    ExecutionResult, Issue, IssueKind, Severity, SubtaskKind, SubtaskStatus, VerificationId,
    VerificationResult,
};

/// Recommendation when nothing needs attention.
pub const KEEP_STANDARD: &str = "Keep the current quality standard";

/// Fraction of low-quality results above which a process review is advised.
const SYSTEMIC_LOW_QUALITY_FRACTION: f64 = 0.3;

/// Per-result score, as used in the aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultScore {
    pub quality: f64,
    pub accuracy: f64,
    pub findings: Vec<FindingArea>,
}

/// Agent that verifies execution results.
#[derive(Debug, Clone)]
pub struct Verifier {
    id: AgentId,
    thresholds: VerificationThresholds,
}

impl Verifier {
    pub fn new(config: &Config) -> Self {
        Self::with_thresholds(config.thresholds.clone())
    }

    pub fn with_thresholds(thresholds: VerificationThresholds) -> Self {
        Self {
            id: AgentId::new(),
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &VerificationThresholds {
        &self.thresholds
    }

    /// Score a single result. Failed results score zero.
    pub fn score(&self, result: &ExecutionResult) -> ResultScore {
        match (&result.artifact, result.success) {
            (Some(artifact), true) => {
                let score = score_artifact(result.subtask_kind, artifact);
                ResultScore {
                    quality: score.quality,
                    accuracy: score.accuracy,
                    findings: score.findings.into_iter().map(|f| f.area).collect(),
                }
            }
            _ => ResultScore {
                quality: 0.0,
                accuracy: 0.0,
                findings: Vec::new(),
            },
        }
    }

    /// Verify a result set.
    ///
    /// Never fails: an empty set yields a failing result with a
    /// `NoResults` issue.
    pub fn verify(&self, results: &[ExecutionResult]) -> VerificationResult {
        let t = &self.thresholds;
        let result_ids: Vec<_> = results.iter().map(|r| r.id).collect();
        let id = VerificationId::for_results(&result_ids);

        if results.is_empty() {
            let issue = Issue::new(
                IssueKind::NoResults,
                Severity::Critical,
                "no results to verify",
            );
            return VerificationResult {
                id,
                result_ids,
                quality_score: 0.0,
                accuracy_score: 0.0,
                error_rate: 0.0,
                recommendations: recommend(&[issue.clone()], &[], 0.0),
                issues: vec![issue],
                passed: false,
            };
        }

        let scores: Vec<ResultScore> = results.iter().map(|r| self.score(r)).collect();
        let (quality, accuracy) = aggregate(results, &scores);
        let failed = results.iter().filter(|r| !r.success).count();
        let error_rate = failed as f64 / results.len() as f64;

        let mut issues: Vec<Issue> = results
            .iter()
            .filter(|r| !r.success)
            .map(failure_issue)
            .collect();

        if quality < t.minimum_quality_score {
            let min = t.minimum_quality_score;
            let issue = Issue::new(
                IssueKind::LowQuality,
                Severity::from_miss(min - quality, min),
                format!("quality score {:.2} below minimum {:.2}", quality, min),
            );
            issues.push(attribute(issue, worst(results, &scores, |s| s.quality)));
        }
        if accuracy < t.minimum_accuracy_score {
            let min = t.minimum_accuracy_score;
            let issue = Issue::new(
                IssueKind::LowAccuracy,
                Severity::from_miss(min - accuracy, min),
                format!("accuracy score {:.2} below minimum {:.2}", accuracy, min),
            );
            issues.push(attribute(issue, worst(results, &scores, |s| s.accuracy)));
        }
        if error_rate > t.maximum_error_rate {
            issues.push(Issue::new(
                IssueKind::ErrorRate,
                Severity::from_miss(error_rate - t.maximum_error_rate, t.maximum_error_rate),
                format!(
                    "error rate {:.2} above maximum {:.2} ({} of {} failed)",
                    error_rate,
                    t.maximum_error_rate,
                    failed,
                    results.len()
                ),
            ));
        }

        for r in results.iter().filter(|r| r.success) {
            let ratio = r.performance_ratio();
            let limit = t.performance_threshold;
            if ratio > limit {
                issues.push(
                    Issue::new(
                        IssueKind::Performance,
                        Severity::from_miss(ratio - limit, limit),
                        format!(
                            "{} subtask '{}' took {:.1}x its estimate",
                            r.subtask_kind, r.subtask_title, ratio
                        ),
                    )
                    .for_subtask(r.subtask_id, r.subtask_kind),
                );
            }
        }

        let passed = quality >= t.minimum_quality_score
            && accuracy >= t.minimum_accuracy_score
            && error_rate <= t.maximum_error_rate;

        let low_quality = scores
            .iter()
            .filter(|s| s.quality < t.minimum_quality_score)
            .count() as f64
            / scores.len() as f64;
        let findings: Vec<FindingArea> = scores
            .iter()
            .flat_map(|s| s.findings.iter().copied())
            .collect();

        tracing::debug!(
            results = results.len(),
            quality,
            accuracy,
            error_rate,
            issues = issues.len(),
            passed,
            "Verification complete"
        );

        VerificationResult {
            id,
            result_ids,
            quality_score: quality,
            accuracy_score: accuracy,
            error_rate,
            recommendations: recommend(&issues, &findings, low_quality),
            issues,
            passed,
        }
    }
}

impl Agent for Verifier {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Verifier
    }

    fn description(&self) -> &str {
        "Scores execution results against type-specific criteria"
    }
}

/// Weighted means of quality and accuracy.
///
/// Each result weighs its estimated duration times its type's weight.
/// Zero estimates fall back to unit weight.
fn aggregate(results: &[ExecutionResult], scores: &[ResultScore]) -> (f64, f64) {
    let (mut q_sum, mut q_weight, mut a_sum, mut a_weight) = (0.0, 0.0, 0.0, 0.0);
    for (r, s) in results.iter().zip(scores) {
        let base = match r.estimated.as_secs_f64() {
            secs if secs > 0.0 => secs,
            _ => 1.0,
        };
        let c = criteria(r.subtask_kind);
        q_sum += s.quality * base * c.quality_weight;
        q_weight += base * c.quality_weight;
        a_sum += s.accuracy * base * c.accuracy_weight;
        a_weight += base * c.accuracy_weight;
    }

    let mean = |sum: f64, weight: f64| {
        if weight > 0.0 {
            clamp_unit(sum / weight)
        } else {
            0.0
        }
    };
    (mean(q_sum, q_weight), mean(a_sum, a_weight))
}

/// Result with the lowest score on `metric`; first in order on ties.
fn worst<'a>(
    results: &'a [ExecutionResult],
    scores: &[ResultScore],
    metric: impl Fn(&ResultScore) -> f64,
) -> Option<&'a ExecutionResult> {
    results
        .iter()
        .zip(scores)
        .fold(None, |best: Option<(&ExecutionResult, f64)>, (r, s)| {
            let value = metric(s);
            match best {
                Some((_, lowest)) if lowest <= value => best,
                _ => Some((r, value)),
            }
        })
        .map(|(r, _)| r)
}

fn failure_issue(result: &ExecutionResult) -> Issue {
    let (kind, severity) = match result.status {
        SubtaskStatus::TimedOut => (IssueKind::Timeout, Severity::High),
        SubtaskStatus::Skipped => (IssueKind::UpstreamFailed, Severity::Medium),
        _ => (IssueKind::ExecutionFailed, Severity::High),
    };
    let cause = result.error.as_deref().unwrap_or("unknown error");
    Issue::new(
        kind,
        severity,
        format!(
            "{} subtask '{}' failed: {}",
            result.subtask_kind, result.subtask_title, cause
        ),
    )
    .for_subtask(result.subtask_id, result.subtask_kind)
}

/// Blame an aggregate issue on the result that contributed most to it.
fn attribute(issue: Issue, result: Option<&ExecutionResult>) -> Issue {
    match result {
        Some(r) => issue.for_subtask(r.subtask_id, r.subtask_kind),
        None => issue,
    }
}

fn issue_recommendations(issue: &Issue) -> &'static [&'static str] {
    match (issue.kind, issue.subtask_kind) {
        (IssueKind::ExecutionFailed, Some(SubtaskKind::Integration)) => {
            &["Add retry with backoff for transient integration errors"]
        }
        (IssueKind::ExecutionFailed, _) => {
            &["Retry failed subtasks with backoff and inspect their errors"]
        }
        (IssueKind::Timeout, _) => &["Raise the subtask deadline or split long-running work"],
        (IssueKind::UpstreamFailed, _) => {
            &["Resolve upstream failures first; dependent work was skipped"]
        }
        (IssueKind::LowQuality, _) => &[
            "Introduce stricter review of produced work",
            "Run static analysis on produced code",
        ],
        (IssueKind::LowAccuracy, _) => &["Re-check outputs against the stated requirements"],
        (IssueKind::ErrorRate, _) => &["Stabilize the failing capability before re-running"],
        (IssueKind::Performance, _) => &[
            "Optimize processes to reduce execution time",
            "Consider running independent subtasks in parallel",
        ],
        (IssueKind::NoResults, _) => &["Ensure the plan yields at least one executable subtask"],
    }
}

fn finding_recommendations(area: FindingArea) -> &'static [&'static str] {
    match area {
        FindingArea::CodeQuality => &[
            "Introduce stricter code review",
            "Run static analysis on produced code",
        ],
        FindingArea::Coverage => &[
            "Raise test coverage to at least 80%",
            "Add integration tests",
        ],
        FindingArea::Documentation => &[
            "Expand documentation with more detail",
            "Add practical examples to the documentation",
        ],
        FindingArea::Performance => &["Document measured performance improvements"],
        FindingArea::Environment => &["Automate environment setup and configuration"],
        FindingArea::Integration => &["Verify data flow across integrated modules"],
        FindingArea::Completeness => &[],
    }
}

/// Build the ordered, de-duplicated recommendation list.
fn recommend(
    issues: &[Issue],
    findings: &[FindingArea],
    low_quality_fraction: f64,
) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    let mut add = |text: &str| {
        if seen.insert(text.to_string()) {
            out.push(text.to_string());
        }
    };

    for issue in issues {
        for &r in issue_recommendations(issue) {
            add(r);
        }
    }
    let areas: BTreeSet<FindingArea> = findings.iter().copied().collect();
    for area in areas {
        for &r in finding_recommendations(area) {
            add(r);
        }
    }
    if low_quality_fraction > SYSTEMIC_LOW_QUALITY_FRACTION {
        add("Review the development process to improve quality");
        add("Add more frequent quality checkpoints");
    }

    if out.is_empty() {
        out.push(KEEP_STANDARD.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Artifact, SubTask, TaskId};
    use std::time::Duration;

    fn subtask(kind: SubtaskKind) -> SubTask {
        SubTask::new(TaskId::new(), kind, "work", "", Duration::from_secs(60))
    }

    fn scored(kind: SubtaskKind, quality: f64, accuracy: f64) -> ExecutionResult {
        ExecutionResult::completed(
            &subtask(kind),
            Artifact::new("done").with_scores(quality, accuracy),
            Duration::from_secs(30),
        )
    }

    fn verifier() -> Verifier {
        Verifier::new(&Config::default())
    }

    #[test]
    fn test_empty_set_fails() {
        let v = verifier().verify(&[]);
        assert!(!v.passed());
        assert_eq!(v.quality_score, 0.0);
        assert_eq!(v.issues_of(IssueKind::NoResults).count(), 1);
        assert_eq!(v.issues[0].description, "no results to verify");
    }

    #[test]
    fn test_low_quality_fails_with_issue_and_recommendation() {
        let results = vec![
            scored(SubtaskKind::Implementation, 0.65, 0.9),
            scored(SubtaskKind::Testing, 0.65, 0.9),
        ];
        let v = verifier().verify(&results);

        assert!(!v.passed());
        assert!((v.quality_score - 0.65).abs() < 1e-9);
        let issue = v.issues_of(IssueKind::LowQuality).next().unwrap();
        assert!(issue.description.contains("0.65"));
        assert_eq!(issue.severity, Severity::Low);
        assert!(issue.subtask_id.is_some());
        assert!(!v.recommendations.is_empty());
        assert!(!v.recommendations.iter().any(|r| r == KEEP_STANDARD));
    }

    #[test]
    fn test_passing_set() {
        let results = vec![
            scored(SubtaskKind::Analysis, 0.9, 0.9),
            scored(SubtaskKind::Design, 0.8, 0.85),
        ];
        let v = verifier().verify(&results);
        assert!(v.passed());
        assert!(v.issues.is_empty());
        assert_eq!(v.recommendations, vec![KEEP_STANDARD.to_string()]);
    }

    #[test]
    fn test_verify_is_idempotent() {
        let s = subtask(SubtaskKind::Integration);
        let results = vec![
            scored(SubtaskKind::Analysis, 0.9, 0.95),
            ExecutionResult::failed(&s, "connection reset", Duration::from_secs(2)),
            ExecutionResult::skipped(&subtask(SubtaskKind::Documentation)),
        ];
        let v = verifier();
        assert_eq!(v.verify(&results), v.verify(&results));
    }

    #[test]
    fn test_failures_produce_one_issue_each() {
        let integration = subtask(SubtaskKind::Integration);
        let results = vec![
            scored(SubtaskKind::Analysis, 1.0, 1.0),
            ExecutionResult::failed(&integration, "503", Duration::from_secs(1)),
            ExecutionResult::skipped(&subtask(SubtaskKind::Testing)),
            ExecutionResult::timed_out(&subtask(SubtaskKind::Setup), Duration::from_secs(5)),
        ];
        let v = verifier().verify(&results);

        assert!(!v.passed());
        assert_eq!(v.error_rate, 0.75);
        assert_eq!(v.issues_of(IssueKind::ExecutionFailed).count(), 1);
        assert_eq!(v.issues_of(IssueKind::UpstreamFailed).count(), 1);
        assert_eq!(v.issues_of(IssueKind::Timeout).count(), 1);
        assert_eq!(v.issues_of(IssueKind::ErrorRate).count(), 1);
        assert!(v
            .recommendations
            .iter()
            .any(|r| r.contains("retry with backoff")));
    }

    #[test]
    fn test_performance_issue_is_independent_of_pass() {
        let slow = ExecutionResult::completed(
            &subtask(SubtaskKind::Design),
            Artifact::new("slow").with_scores(0.9, 0.9),
            Duration::from_secs(300),
        );
        let v = verifier().verify(&[slow]);
        assert!(v.passed());
        let issue = v.issues_of(IssueKind::Performance).next().unwrap();
        assert_eq!(issue.severity, Severity::Critical);
    }

    #[test]
    fn test_scores_stay_in_unit_range() {
        let results = vec![
            scored(SubtaskKind::Testing, 5.0, -3.0),
            scored(SubtaskKind::Setup, f64::NAN, 0.5),
        ];
        let v = verifier().verify(&results);
        assert!((0.0..=1.0).contains(&v.quality_score));
        assert!((0.0..=1.0).contains(&v.accuracy_score));
    }

    #[test]
    fn test_weighting_by_estimate() {
        let big = ExecutionResult::completed(
            &SubTask::new(
                TaskId::new(),
                SubtaskKind::Design,
                "big",
                "",
                Duration::from_secs(900),
            ),
            Artifact::new("").with_scores(1.0, 1.0),
            Duration::from_secs(1),
        );
        let small = ExecutionResult::completed(
            &SubTask::new(
                TaskId::new(),
                SubtaskKind::Design,
                "small",
                "",
                Duration::from_secs(100),
            ),
            Artifact::new("").with_scores(0.0, 0.0),
            Duration::from_secs(1),
        );
        let v = verifier().verify(&[big, small]);
        assert!((v.quality_score - 0.9).abs() < 1e-9);
    }
}
