//! Verification results: scores, issues and the pass/fail decision.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ExecutionResultId, SubtaskId, SubtaskKind};

/// Namespace for deterministic verification ids.
const VERIFICATION_NAMESPACE: Uuid = Uuid::from_u128(0x6c1d_52a4_8f3e_4b0a_9d27_51e8_03aa_7c19);

/// Identifier of a verification result.
///
/// Derived from the referenced execution results, so verifying the same
/// result set twice yields the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerificationId(Uuid);

impl VerificationId {
    pub fn for_results(results: &[ExecutionResultId]) -> Self {
        let mut bytes = Vec::with_capacity(results.len() * 16);
        for id in results {
            bytes.extend_from_slice(id.as_uuid().as_bytes());
        }
        Self(Uuid::new_v5(&VERIFICATION_NAMESPACE, &bytes))
    }
}

impl std::fmt::Display for VerificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of a problem found during verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// The capability reported a failure for a subtask
    ExecutionFailed,
    /// The capability missed the subtask deadline
    Timeout,
    /// The subtask never ran because a dependency failed
    UpstreamFailed,
    /// Aggregate quality below the minimum
    LowQuality,
    /// Aggregate accuracy below the minimum
    LowAccuracy,
    /// Too many failed results
    ErrorRate,
    /// A subtask took much longer than estimated
    Performance,
    /// Nothing to verify
    NoResults,
}

/// How badly a threshold was missed.
///
/// Ordered: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Severity for missing `threshold` by `gap` (both positive).
    ///
    /// Relative miss: < 10% Low, < 25% Medium, < 50% High, else Critical.
    pub fn from_miss(gap: f64, threshold: f64) -> Self {
        let relative = if threshold > 0.0 { gap / threshold } else { 1.0 };
        if relative < 0.10 {
            Self::Low
        } else if relative < 0.25 {
            Self::Medium
        } else if relative < 0.50 {
            Self::High
        } else {
            Self::Critical
        }
    }
}

/// A single problem identified by the verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub description: String,
    /// Subtask the issue is attributed to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<SubtaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_kind: Option<SubtaskKind>,
}

impl Issue {
    pub fn new(kind: IssueKind, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            description: description.into(),
            subtask_id: None,
            subtask_kind: None,
        }
    }

    pub fn for_subtask(mut self, id: SubtaskId, kind: SubtaskKind) -> Self {
        self.subtask_id = Some(id);
        self.subtask_kind = Some(kind);
        self
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}/{:?}] {}", self.severity, self.kind, self.description)
    }
}

/// Result of verifying one set of execution results.
///
/// # Invariants
/// - `quality_score` and `accuracy_score` lie in [0.0, 1.0]
/// - An empty result set never passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub id: VerificationId,
    pub result_ids: Vec<ExecutionResultId>,
    pub quality_score: f64,
    pub accuracy_score: f64,
    pub error_rate: f64,
    pub issues: Vec<Issue>,
    pub recommendations: Vec<String>,
    pub passed: bool,
}

impl VerificationResult {
    pub fn passed(&self) -> bool {
        self.passed
    }

    /// Issues of the given kind.
    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }

    /// The most severe issue, if any.
    pub fn worst_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }
}
