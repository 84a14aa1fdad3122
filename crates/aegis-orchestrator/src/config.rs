// ABOUTME: Configuration loading and validation for the aegis orchestrator.
// ABOUTME: Reads AEGIS_* environment variables with defaults and rejects out-of-range values.

use std::path::PathBuf;
use std::time::Duration;

use aegis_core::risk::DEFAULT_REVIEW_THRESHOLD;
use aegis_core::{ReviewMode, RiskError, RiskGate};
use thiserror::Error;

pub const DEFAULT_COST_RATE_PER_SEC: f64 = 0.0005;
pub const DEFAULT_VARIANT: &str = "default";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid number: {value}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("AEGIS_REVIEW_THRESHOLD must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f64),

    #[error("COST_RATE_PER_SEC must be non-negative, got {0}")]
    NegativeCostRate(f64),

    #[error("AEGIS_REVIEW_MODE must be 'advisory' or 'blocking', got '{0}'")]
    InvalidReviewMode(String),

    #[error("risk gate setup failed: {0}")]
    Risk(#[from] RiskError),
}

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub home: PathBuf,
    pub manifest_path: PathBuf,
    pub feedback_db: PathBuf,
    pub cost_rate_per_sec: f64,
    pub review_threshold: f64,
    pub review_mode: ReviewMode,
    pub registry_lock_timeout: Duration,
    pub tool_timeout: Option<Duration>,
    pub default_variant: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let home = default_home();
        Self {
            manifest_path: home.join("agents.yaml"),
            feedback_db: home.join("feedback.db"),
            home,
            cost_rate_per_sec: DEFAULT_COST_RATE_PER_SEC,
            review_threshold: DEFAULT_REVIEW_THRESHOLD,
            review_mode: ReviewMode::Advisory,
            registry_lock_timeout: Duration::from_millis(5000),
            tool_timeout: None,
            default_variant: DEFAULT_VARIANT.to_string(),
        }
    }
}

fn default_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".aegis")
}

impl OrchestratorConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - AEGIS_HOME: data directory (default: ~/.aegis)
    /// - AEGIS_MANIFEST: agent manifest path (default: $AEGIS_HOME/agents.yaml)
    /// - AEGIS_FEEDBACK_DB: feedback database path (default: $AEGIS_HOME/feedback.db)
    /// - COST_RATE_PER_SEC: cost estimate per second of run time (default: 0.0005)
    /// - AEGIS_REVIEW_THRESHOLD: risk score at which review is required (default: 0.6)
    /// - AEGIS_REVIEW_MODE: advisory or blocking (default: advisory)
    /// - AEGIS_REGISTRY_LOCK_TIMEOUT_MS: registry lock wait (default: 5000)
    /// - AEGIS_TOOL_TIMEOUT_MS: per-invocation tool timeout (optional)
    /// - AEGIS_DEFAULT_VARIANT: variant used without enough history (default: default)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let home = var("AEGIS_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                lookup("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".aegis")
            });
        let manifest_path = var("AEGIS_MANIFEST")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("agents.yaml"));
        let feedback_db = var("AEGIS_FEEDBACK_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("feedback.db"));

        let cost_rate_per_sec = parse_f64("COST_RATE_PER_SEC", var("COST_RATE_PER_SEC"))?
            .unwrap_or(DEFAULT_COST_RATE_PER_SEC);
        if cost_rate_per_sec < 0.0 {
            return Err(ConfigError::NegativeCostRate(cost_rate_per_sec));
        }

        let review_threshold =
            parse_f64("AEGIS_REVIEW_THRESHOLD", var("AEGIS_REVIEW_THRESHOLD"))?
                .unwrap_or(DEFAULT_REVIEW_THRESHOLD);
        if !(0.0..=1.0).contains(&review_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(review_threshold));
        }

        let review_mode = match var("AEGIS_REVIEW_MODE") {
            Some(mode) => mode
                .parse::<ReviewMode>()
                .map_err(|_| ConfigError::InvalidReviewMode(mode))?,
            None => ReviewMode::Advisory,
        };

        let registry_lock_timeout = parse_millis(
            "AEGIS_REGISTRY_LOCK_TIMEOUT_MS",
            var("AEGIS_REGISTRY_LOCK_TIMEOUT_MS"),
        )?
        .unwrap_or(Duration::from_millis(5000));
        let tool_timeout = parse_millis("AEGIS_TOOL_TIMEOUT_MS", var("AEGIS_TOOL_TIMEOUT_MS"))?;

        let default_variant =
            var("AEGIS_DEFAULT_VARIANT").unwrap_or_else(|| DEFAULT_VARIANT.to_string());

        Ok(Self {
            home,
            manifest_path,
            feedback_db,
            cost_rate_per_sec,
            review_threshold,
            review_mode,
            registry_lock_timeout,
            tool_timeout,
            default_variant,
        })
    }

    /// Risk gate configured with this threshold and mode.
    pub fn risk_gate(&self) -> Result<RiskGate, ConfigError> {
        Ok(RiskGate::with_policy(self.review_threshold, self.review_mode)?)
    }
}

fn parse_f64(var: &'static str, value: Option<String>) -> Result<Option<f64>, ConfigError> {
    value
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .ok_or(ConfigError::InvalidNumber { var, value: v })
        })
        .transpose()
}

fn parse_millis(var: &'static str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    value
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidNumber { var, value: v })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn config_loads_defaults() {
        let config = OrchestratorConfig::from_lookup(lookup(&[("HOME", "/home/ops")])).unwrap();

        assert_eq!(config.home, PathBuf::from("/home/ops/.aegis"));
        assert_eq!(config.manifest_path, PathBuf::from("/home/ops/.aegis/agents.yaml"));
        assert_eq!(config.feedback_db, PathBuf::from("/home/ops/.aegis/feedback.db"));
        assert_eq!(config.cost_rate_per_sec, 0.0005);
        assert_eq!(config.review_threshold, 0.6);
        assert_eq!(config.review_mode, ReviewMode::Advisory);
        assert_eq!(config.registry_lock_timeout, Duration::from_secs(5));
        assert!(config.tool_timeout.is_none());
        assert_eq!(config.default_variant, "default");
    }

    #[test]
    fn config_reads_overrides() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            ("AEGIS_HOME", "/srv/aegis"),
            ("AEGIS_FEEDBACK_DB", "/var/lib/aegis/fb.db"),
            ("COST_RATE_PER_SEC", "0.01"),
            ("AEGIS_REVIEW_THRESHOLD", "0.5"),
            ("AEGIS_REVIEW_MODE", "Blocking"),
            ("AEGIS_REGISTRY_LOCK_TIMEOUT_MS", "250"),
            ("AEGIS_TOOL_TIMEOUT_MS", "1500"),
            ("AEGIS_DEFAULT_VARIANT", "baseline"),
        ]))
        .unwrap();

        assert_eq!(config.manifest_path, PathBuf::from("/srv/aegis/agents.yaml"));
        assert_eq!(config.feedback_db, PathBuf::from("/var/lib/aegis/fb.db"));
        assert_eq!(config.cost_rate_per_sec, 0.01);
        assert_eq!(config.review_threshold, 0.5);
        assert_eq!(config.review_mode, ReviewMode::Blocking);
        assert_eq!(config.registry_lock_timeout, Duration::from_millis(250));
        assert_eq!(config.tool_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.default_variant, "baseline");
    }

    #[test]
    fn config_rejects_threshold_out_of_range() {
        let err = OrchestratorConfig::from_lookup(lookup(&[("AEGIS_REVIEW_THRESHOLD", "1.5")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ThresholdOutOfRange(_)));
        assert!(err.to_string().contains("AEGIS_REVIEW_THRESHOLD"));
    }

    #[test]
    fn config_rejects_garbage_numbers_and_modes() {
        let err = OrchestratorConfig::from_lookup(lookup(&[("COST_RATE_PER_SEC", "cheap")]))
            .unwrap_err();
        assert!(err.to_string().contains("COST_RATE_PER_SEC"));

        let err = OrchestratorConfig::from_lookup(lookup(&[("COST_RATE_PER_SEC", "-1")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::NegativeCostRate(_)));

        let err = OrchestratorConfig::from_lookup(lookup(&[("AEGIS_TOOL_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("AEGIS_TOOL_TIMEOUT_MS"));

        let err = OrchestratorConfig::from_lookup(lookup(&[("AEGIS_REVIEW_MODE", "strict")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidReviewMode(ref m) if m == "strict"));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config =
            OrchestratorConfig::from_lookup(lookup(&[("HOME", "/h"), ("AEGIS_REVIEW_MODE", " ")]))
                .unwrap();
        assert_eq!(config.review_mode, ReviewMode::Advisory);
    }

    #[test]
    fn risk_gate_uses_configured_policy() {
        let config = OrchestratorConfig {
            review_threshold: 0.4,
            review_mode: ReviewMode::Blocking,
            ..OrchestratorConfig::default()
        };
        let gate = config.risk_gate().unwrap();
        assert_eq!(gate.threshold(), 0.4);
        assert_eq!(gate.mode(), ReviewMode::Blocking);
    }
}
