//! Complexity classification and the subtask-type catalogue per tier.
//!
//! Classification is a pure function of the task's requirement count and
//! priority. Keywords in the task text may pull in types that the tier
//! alone would not include, up to the tier's keyword allowance.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::ComplexityThresholds;
use crate::task::{Priority, SubtaskKind, Task};

/// Complexity tier of a task.
///
/// Ordered: `Simple < Medium < Complex < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
    Critical,
}

impl Complexity {
    /// Classify a task.
    ///
    /// # Rules
    /// 1. Tier from requirement count (medium, complex and critical minimums)
    /// 2. HIGH or CRITICAL priority with enough requirements escalates one tier
    /// 3. CRITICAL priority is never classified below medium
    pub fn classify(task: &Task, thresholds: &ComplexityThresholds) -> Self {
        let n = task.requirements().len();
        let mut tier = if n >= thresholds.critical_min_requirements {
            Self::Critical
        } else if n >= thresholds.complex_min_requirements {
            Self::Complex
        } else if n >= thresholds.medium_min_requirements {
            Self::Medium
        } else {
            Self::Simple
        };

        if n >= thresholds.escalation_min_requirements && task.priority() >= Priority::High {
            tier = tier.escalate();
        }
        if task.priority() == Priority::Critical {
            tier = tier.max(Self::Medium);
        }
        tier
    }

    /// One tier up, capped at `Critical`.
    pub fn escalate(self) -> Self {
        match self {
            Self::Simple => Self::Medium,
            Self::Medium => Self::Complex,
            Self::Complex | Self::Critical => Self::Critical,
        }
    }

    /// Types every task of this tier is decomposed into.
    pub fn base_kinds(self) -> &'static [SubtaskKind] {
        use SubtaskKind::*;
        match self {
            Self::Simple => &[Analysis, Implementation, Testing],
            Self::Medium => &[Analysis, Design, Implementation, Testing],
            Self::Complex => &[
                Analysis,
                Design,
                Setup,
                Implementation,
                Integration,
                Testing,
                Documentation,
            ],
            Self::Critical => &[
                Analysis,
                Design,
                Setup,
                Implementation,
                Integration,
                Testing,
                Optimization,
                Documentation,
            ],
        }
    }

    /// How many types keywords may add on top of [`base_kinds`](Self::base_kinds).
    ///
    /// Keeps simple and medium plans at most one type above their base.
    pub fn keyword_allowance(self) -> usize {
        match self {
            Self::Simple | Self::Medium => 1,
            Self::Complex | Self::Critical => usize::MAX,
        }
    }

    /// Whether implementation is split into a core and an interface part.
    pub fn splits_implementation(self) -> bool {
        self >= Self::Complex
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyword stems that pull a type into a plan, matched case-insensitively
/// against the words of the title, description and requirements.
///
/// Stems of at least [`STEM_MIN_LEN`] letters match any word they start;
/// shorter ones only match whole words, so "docker" is not "doc".
const KEYWORDS: &[(SubtaskKind, &[&str])] = &[
    (SubtaskKind::Design, &["design", "architect", "interface"]),
    (
        SubtaskKind::Setup,
        &["setup", "environment", "config", "install", "deploy"],
    ),
    (
        SubtaskKind::Integration,
        &["integrat", "api", "apis", "webhook", "external"],
    ),
    (
        SubtaskKind::Documentation,
        &["doc", "docs", "document", "readme"],
    ),
    (
        SubtaskKind::Optimization,
        &["performance", "optimi", "cache", "caching", "latency"],
    ),
];

const STEM_MIN_LEN: usize = 5;

fn words(task: &Task) -> Vec<String> {
    let mut text = format!("{} {}", task.title(), task.description()).to_lowercase();
    for requirement in task.requirements() {
        text.push(' ');
        text.push_str(&requirement.to_lowercase());
    }
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn stem_matches(word: &str, stem: &str) -> bool {
    word == stem || (stem.len() >= STEM_MIN_LEN && word.starts_with(stem))
}

/// Types requested by keywords, most-mentioned first.
///
/// Ties keep catalogue order.
fn keyword_hits(task: &Task) -> Vec<SubtaskKind> {
    let words = words(task);
    let mut hits: Vec<(usize, SubtaskKind)> = KEYWORDS
        .iter()
        .map(|(kind, stems)| {
            let count = words
                .iter()
                .filter(|w| stems.iter().any(|s| stem_matches(w, s)))
                .count();
            (count, *kind)
        })
        .filter(|(count, _)| *count > 0)
        .collect();
    // Stable sort keeps catalogue order among equal counts.
    hits.sort_by(|a, b| b.0.cmp(&a.0));
    hits.into_iter().map(|(_, kind)| kind).collect()
}

/// Types requested by keywords in the task text.
pub fn keyword_kinds(task: &Task) -> BTreeSet<SubtaskKind> {
    keyword_hits(task).into_iter().collect()
}

/// Final set of types for a task: the tier's base types plus at most
/// `tier.keyword_allowance()` keyword types.
pub fn select_kinds(task: &Task, tier: Complexity) -> BTreeSet<SubtaskKind> {
    let mut kinds: BTreeSet<SubtaskKind> = tier.base_kinds().iter().copied().collect();
    let extra: Vec<SubtaskKind> = keyword_hits(task)
        .into_iter()
        .filter(|kind| !kinds.contains(kind))
        .take(tier.keyword_allowance())
        .collect();
    kinds.extend(extra);
    kinds
}
