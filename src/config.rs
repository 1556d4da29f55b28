//! Configuration management for planloop.
//!
//! Every knob has a default, so `Config::default()` is a working engine.
//! Values can be overridden via environment variables:
//! - `PLANLOOP_CONFIG` - Optional. Path to a YAML or JSON config file loaded first.
//! - `PLANLOOP_MAX_REPLANS` - Optional. Maximum re-planning cycles. Defaults to `3`.
//! - `PLANLOOP_CONCURRENCY` - Optional. Concurrent subtasks per plan. Defaults to `4`.
//! - `PLANLOOP_SUBTASK_TIMEOUT_SECS` - Optional. Per-subtask deadline in seconds.
//! - `PLANLOOP_MIN_QUALITY` - Optional. Defaults to `0.7`.
//! - `PLANLOOP_MIN_ACCURACY` - Optional. Defaults to `0.8`.
//! - `PLANLOOP_MAX_ERROR_RATE` - Optional. Defaults to `0.1`.
//! - `PLANLOOP_PERFORMANCE_THRESHOLD` - Optional. Elapsed/estimated ratio. Defaults to `2.0`.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::SubtaskKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },
}

/// Thresholds used by the verifier's decision rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationThresholds {
    /// Aggregate quality must be at least this
    pub minimum_quality_score: f64,

    /// Aggregate accuracy must be at least this
    pub minimum_accuracy_score: f64,

    /// Fraction of failed results must not exceed this
    pub maximum_error_rate: f64,

    /// Elapsed/estimated ratio above which a performance issue is recorded
    pub performance_threshold: f64,
}

impl Default for VerificationThresholds {
    fn default() -> Self {
        Self {
            minimum_quality_score: 0.7,
            minimum_accuracy_score: 0.8,
            maximum_error_rate: 0.1,
            performance_threshold: 2.0,
        }
    }
}

/// Requirement-count thresholds for the planner's complexity tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityThresholds {
    pub medium_min_requirements: usize,
    pub complex_min_requirements: usize,
    pub critical_min_requirements: usize,

    /// A HIGH or CRITICAL task with at least this many requirements
    /// is escalated one tier
    pub escalation_min_requirements: usize,
}

impl Default for ComplexityThresholds {
    fn default() -> Self {
        Self {
            medium_min_requirements: 3,
            complex_min_requirements: 6,
            critical_min_requirements: 9,
            escalation_min_requirements: 4,
        }
    }
}

/// Upper bound for any configured duration (one year), in seconds.
pub const MAX_DURATION_SECS: f64 = 365.0 * 24.0 * 3600.0;

/// Estimated duration per subtask type, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DurationTable(BTreeMap<SubtaskKind, f64>);

impl DurationTable {
    /// Same estimate for every kind (handy for tests and simulations).
    pub fn uniform(secs: f64) -> Self {
        Self(SubtaskKind::ALL.iter().map(|k| (*k, secs)).collect())
    }

    pub fn with(mut self, kind: SubtaskKind, secs: f64) -> Self {
        self.0.insert(kind, secs);
        self
    }

    /// Raw estimate for `kind` in seconds; kinds missing from a partial
    /// table fall back to the default table.
    pub fn secs(&self, kind: SubtaskKind) -> f64 {
        self.0
            .get(&kind)
            .copied()
            .unwrap_or_else(|| default_estimate_secs(kind))
    }

    /// Estimated duration for `kind`, clamped to `[0, MAX_DURATION_SECS]`.
    pub fn estimate(&self, kind: SubtaskKind) -> Duration {
        let secs = self.secs(kind).clamp(0.0, MAX_DURATION_SECS);
        Duration::try_from_secs_f64(secs).unwrap_or_default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (kind, secs) in &self.0 {
            if !secs.is_finite() || *secs <= 0.0 || *secs > MAX_DURATION_SECS {
                return Err(ConfigError::InvalidValue(
                    format!("durations.{}", kind),
                    format!(
                        "{} is not a positive number of seconds up to {}",
                        secs, MAX_DURATION_SECS
                    ),
                ));
            }
        }
        Ok(())
    }
}

fn default_estimate_secs(kind: SubtaskKind) -> f64 {
    let minutes = match kind {
        SubtaskKind::Analysis => 30.0,
        SubtaskKind::Design => 45.0,
        SubtaskKind::Implementation => 90.0,
        SubtaskKind::Testing => 60.0,
        SubtaskKind::Documentation => 30.0,
        SubtaskKind::Setup => 30.0,
        SubtaskKind::Integration => 60.0,
        SubtaskKind::Optimization => 45.0,
    };
    minutes * 60.0
}

impl Default for DurationTable {
    fn default() -> Self {
        Self(
            SubtaskKind::ALL
                .iter()
                .map(|k| (*k, default_estimate_secs(*k)))
                .collect(),
        )
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Re-planning cycles allowed after the first plan
    pub max_replanning_attempts: u32,

    /// Maximum subtasks of one plan running at the same time
    pub concurrency_limit: usize,

    /// Optional deadline for a single capability call, in seconds
    pub subtask_timeout_secs: Option<f64>,

    /// Verifier decision thresholds
    pub thresholds: VerificationThresholds,

    /// Planner complexity tiers
    pub complexity: ComplexityThresholds,

    /// Multiplicative buffer applied to estimates on every re-plan (> 1.0)
    pub replan_safety_margin: f64,

    /// Per-type estimated durations
    pub durations: DurationTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_replanning_attempts: 3,
            concurrency_limit: 4,
            subtask_timeout_secs: None,
            thresholds: VerificationThresholds::default(),
            complexity: ComplexityThresholds::default(),
            replan_safety_margin: 1.2,
            durations: DurationTable::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// If `PLANLOOP_CONFIG` is set, that file is the base and individual
    /// variables override it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed, the file cannot
    /// be loaded, or the result fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("PLANLOOP_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Some(v) = env_parse("PLANLOOP_MAX_REPLANS")? {
            config.max_replanning_attempts = v;
        }
        if let Some(v) = env_parse("PLANLOOP_CONCURRENCY")? {
            config.concurrency_limit = v;
        }
        if let Some(v) = env_parse("PLANLOOP_SUBTASK_TIMEOUT_SECS")? {
            config.subtask_timeout_secs = Some(v);
        }
        if let Some(v) = env_parse("PLANLOOP_MIN_QUALITY")? {
            config.thresholds.minimum_quality_score = v;
        }
        if let Some(v) = env_parse("PLANLOOP_MIN_ACCURACY")? {
            config.thresholds.minimum_accuracy_score = v;
        }
        if let Some(v) = env_parse("PLANLOOP_MAX_ERROR_RATE")? {
            config.thresholds.maximum_error_rate = v;
        }
        if let Some(v) = env_parse("PLANLOOP_PERFORMANCE_THRESHOLD")? {
            config.thresholds.performance_threshold = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML (`.yaml`/`.yml`) or JSON file.
    ///
    /// Keys missing from the file keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: shown.clone(),
            source,
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let config: Self = if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: shown.clone(),
                message: e.to_string(),
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: shown.clone(),
                message: e.to_string(),
            })?
        };

        config.validate()?;
        tracing::info!("Loaded configuration from {}", shown);
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
            ConfigError::InvalidValue(field.to_string(), reason.into())
        }

        if self.concurrency_limit == 0 {
            return Err(invalid("concurrency_limit", "must be at least 1"));
        }

        let t = &self.thresholds;
        for (name, value) in [
            ("minimum_quality_score", t.minimum_quality_score),
            ("minimum_accuracy_score", t.minimum_accuracy_score),
            ("maximum_error_rate", t.maximum_error_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(name, format!("{} is outside [0, 1]", value)));
            }
        }
        if !t.performance_threshold.is_finite() || t.performance_threshold <= 0.0 {
            return Err(invalid("performance_threshold", "must be positive"));
        }

        if !self.replan_safety_margin.is_finite() || self.replan_safety_margin <= 1.0 {
            return Err(invalid("replan_safety_margin", "must be greater than 1.0"));
        }

        if let Some(secs) = self.subtask_timeout_secs {
            if !secs.is_finite() || secs <= 0.0 || secs > MAX_DURATION_SECS {
                return Err(invalid(
                    "subtask_timeout_secs",
                    format!("must be positive and at most {}", MAX_DURATION_SECS),
                ));
            }
        }

        let c = &self.complexity;
        if !(c.medium_min_requirements < c.complex_min_requirements
            && c.complex_min_requirements < c.critical_min_requirements)
        {
            return Err(invalid("complexity", "tier thresholds must be strictly increasing"));
        }

        self.durations.validate()
    }

    /// Per-subtask deadline, if configured.
    ///
    /// Out-of-range values (only possible on an unvalidated config) mean
    /// no deadline.
    pub fn subtask_timeout(&self) -> Option<Duration> {
        self.subtask_timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

fn env_parse<T>(var: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue(var.to_string(), e.to_string())),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_replanning_attempts, 3);
        assert_eq!(config.thresholds.minimum_accuracy_score, 0.8);
        assert_eq!(
            config.durations.estimate(SubtaskKind::Analysis),
            Duration::from_secs(1800)
        );
    }

    #[test]
    fn test_yaml_file_with_partial_keys() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "max_replanning_attempts: 5\nthresholds:\n  minimum_quality_score: 0.5\ndurations:\n  testing: 12.5\n"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.max_replanning_attempts, 5);
        assert_eq!(config.thresholds.minimum_quality_score, 0.5);
        assert_eq!(config.thresholds.minimum_accuracy_score, 0.8);
        assert_eq!(
            config.durations.estimate(SubtaskKind::Testing),
            Duration::from_secs_f64(12.5)
        );
        // Kinds missing from a partial table use the defaults.
        assert_eq!(
            config.durations.estimate(SubtaskKind::Setup),
            Duration::from_secs(1800)
        );
    }

    #[test]
    fn test_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"concurrency_limit": 8, "subtask_timeout_secs": 2.0}}"#).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.concurrency_limit, 8);
        assert_eq!(config.subtask_timeout(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_unrepresentable_durations_are_rejected() {
        let mut config = Config::default();
        config.durations = DurationTable::uniform(60.0).with(SubtaskKind::Design, 1e300);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref f, _) if f == "durations.design"));

        let mut config = Config::default();
        config.subtask_timeout_secs = Some(1e300);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref f, _) if f == "subtask_timeout_secs"));

        // Unvalidated values never panic when converted.
        assert_eq!(config.subtask_timeout(), None);
        let table = DurationTable::uniform(f64::INFINITY);
        assert_eq!(
            table.estimate(SubtaskKind::Testing),
            Duration::from_secs_f64(MAX_DURATION_SECS)
        );
    }

    #[test]
    fn test_invalid_file_values_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"concurrency_limit": 0}}"#).unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref f, _) if f == "concurrency_limit"));
    }

    #[test]
    fn test_validation_ranges() {
        let mut config = Config::default();
        config.thresholds.minimum_quality_score = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.replan_safety_margin = 1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.complexity.complex_min_requirements = 2;
        assert!(config.validate().is_err());

        let config = Config {
            durations: DurationTable::uniform(0.0),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/planloop.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
