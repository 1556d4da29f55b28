//! Type-specific scoring criteria for the verifier.
//!
//! Each subtask type has a fixed weight pair and a scoring rule over the
//! artifact payload. Rules report findings (what is missing or weak) that
//! the verifier turns into recommendations.

use serde_json::Value;

use crate::task::{Artifact, SubtaskKind};

/// Weight pair of one subtask type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Criteria {
    pub quality_weight: f64,
    pub accuracy_weight: f64,
}

/// Criteria table.
pub fn criteria(kind: SubtaskKind) -> Criteria {
    let (quality_weight, accuracy_weight) = match kind {
        SubtaskKind::Analysis => (1.0, 1.2),
        SubtaskKind::Design => (1.1, 1.0),
        SubtaskKind::Implementation => (1.3, 1.1),
        SubtaskKind::Testing => (1.2, 1.3),
        SubtaskKind::Documentation => (0.8, 0.8),
        SubtaskKind::Setup => (0.7, 0.9),
        SubtaskKind::Integration => (1.1, 1.2),
        SubtaskKind::Optimization => (1.0, 0.9),
    };
    Criteria {
        quality_weight,
        accuracy_weight,
    }
}

/// Area a finding belongs to; drives recommendation selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FindingArea {
    Completeness,
    CodeQuality,
    Coverage,
    Documentation,
    Environment,
    Integration,
    Performance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub area: FindingArea,
    pub message: String,
}

impl Finding {
    fn new(area: FindingArea, message: impl Into<String>) -> Self {
        Self {
            area,
            message: message.into(),
        }
    }
}

/// Score of a single artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactScore {
    pub quality: f64,
    pub accuracy: f64,
    pub findings: Vec<Finding>,
}

/// Score an artifact with the rule of its subtask type.
///
/// Explicit `quality`/`accuracy` on the artifact override the rule's value
/// for that metric. Both scores are clamped to [0.0, 1.0].
pub fn score_artifact(kind: SubtaskKind, artifact: &Artifact) -> ArtifactScore {
    let data = &artifact.data;
    let (quality, accuracy, findings) = match kind {
        SubtaskKind::Analysis => score_analysis(data),
        SubtaskKind::Design => score_design(data),
        SubtaskKind::Implementation => score_implementation(data),
        SubtaskKind::Testing => score_testing(data),
        SubtaskKind::Documentation => score_documentation(data),
        SubtaskKind::Setup => score_setup(data),
        SubtaskKind::Integration => score_integration(data),
        SubtaskKind::Optimization => score_optimization(data),
    };

    // Nothing to inspect without a payload.
    let findings = if data.is_null() { Vec::new() } else { findings };

    ArtifactScore {
        quality: clamp_unit(artifact.quality.unwrap_or(quality)),
        accuracy: clamp_unit(artifact.accuracy.unwrap_or(accuracy)),
        findings,
    }
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Number of entries of an array or object field (0 when absent).
fn count(data: &Value, key: &str) -> usize {
    data.get(key).map(count_value).unwrap_or(0)
}

fn count_value(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        _ => 0,
    }
}

fn number(data: &Value, key: &str) -> f64 {
    data.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn flag(data: &Value, key: &str) -> bool {
    data.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn penalized(per_finding: f64, findings: &[Finding]) -> f64 {
    (1.0 - per_finding * findings.len() as f64).max(0.0)
}

type Rule = (f64, f64, Vec<Finding>);

fn score_analysis(data: &Value) -> Rule {
    let mut findings = Vec::new();
    for field in ["requirements_identified", "stakeholders", "constraints", "risks"] {
        if count(data, field) == 0 {
            findings.push(Finding::new(
                FindingArea::Completeness,
                format!("analysis is missing {}", field),
            ));
        }
    }
    let requirements = count(data, "requirements_identified");
    if requirements < 3 {
        findings.push(Finding::new(
            FindingArea::Completeness,
            format!("only {} requirement(s) identified", requirements),
        ));
    }

    let accuracy = if requirements >= 3 { 0.9 } else { 0.6 };
    (penalized(0.2, &findings), accuracy, findings)
}

fn score_design(data: &Value) -> Rule {
    let mut findings = Vec::new();
    if data.get("architecture_pattern").is_none() {
        findings.push(Finding::new(
            FindingArea::Completeness,
            "architecture pattern not specified",
        ));
    }
    let components = count(data, "components");
    if components < 2 {
        findings.push(Finding::new(
            FindingArea::Completeness,
            format!("only {} component(s) defined", components),
        ));
    }
    if count(data, "interfaces") == 0 {
        findings.push(Finding::new(FindingArea::Completeness, "no interfaces defined"));
    }

    let accuracy = if components >= 3 { 0.85 } else { 0.7 };
    (penalized(0.25, &findings), accuracy, findings)
}

fn score_implementation(data: &Value) -> Rule {
    let mut findings = Vec::new();
    if count(data, "files_created") < 3 {
        findings.push(Finding::new(
            FindingArea::Completeness,
            "too few files created",
        ));
    }
    let code_quality = number(data, "code_quality_score");
    if code_quality < 0.7 {
        findings.push(Finding::new(
            FindingArea::CodeQuality,
            format!("code quality low: {:.2}", code_quality),
        ));
    }
    let lines = number(data, "lines_of_code");
    if lines < 100.0 {
        findings.push(Finding::new(FindingArea::Completeness, "implementation too small"));
    }

    let quality = (code_quality + 0.1).min(1.0);
    let accuracy = if lines >= 200.0 { 0.9 } else { 0.7 };
    (quality, accuracy, findings)
}

fn score_testing(data: &Value) -> Rule {
    let mut findings = Vec::new();
    let executed = number(data, "tests_executed");
    let passed = number(data, "tests_passed");
    let coverage = number(data, "coverage_percentage");

    if coverage < 80.0 {
        findings.push(Finding::new(
            FindingArea::Coverage,
            format!("test coverage low: {:.1}%", coverage),
        ));
    }

    let pass_rate = if executed > 0.0 {
        (passed / executed).min(1.0)
    } else {
        0.0
    };
    if executed <= 0.0 {
        findings.push(Finding::new(FindingArea::Coverage, "no tests executed"));
    } else if pass_rate < 0.9 {
        findings.push(Finding::new(
            FindingArea::Coverage,
            format!("test pass rate low: {:.1}%", pass_rate * 100.0),
        ));
    }

    let bugs = number(data, "bugs_found");
    if bugs > 3.0 {
        findings.push(Finding::new(
            FindingArea::CodeQuality,
            format!("{} bugs found", bugs),
        ));
    }

    let quality = (coverage / 100.0 + 0.1).min(1.0);
    (quality, pass_rate, findings)
}

fn score_documentation(data: &Value) -> Rule {
    let mut findings = Vec::new();
    if count(data, "documents_created") < 2 {
        findings.push(Finding::new(
            FindingArea::Documentation,
            "too few documents created",
        ));
    }
    let pages = number(data, "pages_written");
    if pages < 10.0 {
        findings.push(Finding::new(FindingArea::Documentation, "documentation too brief"));
    }

    let sections: Vec<&str> = data
        .get("sections")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let missing: Vec<&str> = ["Introduction", "Installation", "Usage"]
        .into_iter()
        .filter(|s| !sections.contains(s))
        .collect();
    if !missing.is_empty() {
        findings.push(Finding::new(
            FindingArea::Documentation,
            format!("missing sections: {}", missing.join(", ")),
        ));
    }

    let accuracy = if pages >= 20.0 { 0.9 } else { 0.7 };
    (penalized(0.2, &findings), accuracy, findings)
}

fn score_setup(data: &Value) -> Rule {
    let mut findings = Vec::new();
    if !flag(data, "environment_configured") {
        findings.push(Finding::new(
            FindingArea::Environment,
            "environment not configured",
        ));
    }
    let tools = count(data, "tools_installed");
    if tools < 3 {
        findings.push(Finding::new(
            FindingArea::Environment,
            format!("only {} tool(s) installed", tools),
        ));
    }
    if count(data, "config_files") == 0 {
        findings.push(Finding::new(FindingArea::Environment, "no config files created"));
    }

    let accuracy = if tools >= 5 { 0.95 } else { 0.8 };
    (penalized(0.3, &findings), accuracy, findings)
}

fn score_integration(data: &Value) -> Rule {
    let mut findings = Vec::new();
    if count(data, "modules_integrated") < 2 {
        findings.push(Finding::new(
            FindingArea::Integration,
            "too few modules integrated",
        ));
    }
    if !flag(data, "data_flow_verified") {
        findings.push(Finding::new(FindingArea::Integration, "data flow not verified"));
    }
    let tests = number(data, "integration_tests_passed");
    if tests < 5.0 {
        findings.push(Finding::new(
            FindingArea::Integration,
            "too few integration tests passed",
        ));
    }

    let accuracy = if tests >= 10.0 { 0.9 } else { 0.7 };
    (penalized(0.25, &findings), accuracy, findings)
}

fn score_optimization(data: &Value) -> Rule {
    let mut findings = Vec::new();
    let applied = count(data, "optimizations_applied");
    if applied < 2 {
        findings.push(Finding::new(
            FindingArea::Performance,
            format!("only {} optimization(s) applied", applied),
        ));
    }

    let improvements = data.get("performance_improvements");
    if improvements.map(|v| count_value(v) == 0).unwrap_or(true) {
        findings.push(Finding::new(
            FindingArea::Performance,
            "performance improvements not documented",
        ));
    }
    let faster = improvements
        .and_then(|v| v.get("response_time"))
        .and_then(Value::as_str)
        .map(|s| s.contains("faster"))
        .unwrap_or(false);
    if !faster {
        findings.push(Finding::new(
            FindingArea::Performance,
            "response time did not improve",
        ));
    }

    let accuracy = if applied >= 3 { 0.85 } else { 0.7 };
    (penalized(0.2, &findings), accuracy, findings)
}
