// ABOUTME: Risk gate that scores a trigger instruction against fixed sensitive-phrasing categories.
// ABOUTME: Each matched category adds 0.5, capped at 1.0; review is required at or above a threshold.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Weight contributed by each matched category.
pub const CATEGORY_WEIGHT: f64 = 0.5;

/// Score at or above which an instruction needs human review.
pub const DEFAULT_REVIEW_THRESHOLD: f64 = 0.6;

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("invalid risk pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("review threshold must be within [0, 1], got {0}")]
    Threshold(f64),

    #[error("unknown review mode: {0} (expected advisory or blocking)")]
    Mode(String),
}

/// Sensitive phrasing the gate looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    FundsTransfer,
    AccountDeletion,
    ShellExecution,
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FundsTransfer => write!(f, "funds_transfer"),
            Self::AccountDeletion => write!(f, "account_deletion"),
            Self::ShellExecution => write!(f, "shell_execution"),
        }
    }
}

/// Whether a verdict that requires review halts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewMode {
    /// Log and report the verdict, keep executing.
    #[default]
    Advisory,
    /// Stop the run before any task when review is required.
    Blocking,
}

impl FromStr for ReviewMode {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "advisory" => Ok(Self::Advisory),
            "blocking" => Ok(Self::Blocking),
            other => Err(RiskError::Mode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    AutoApproved,
    RequiresReview,
}

/// Outcome of running the gate over one instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub score: f64,
    pub categories: Vec<RiskCategory>,
    pub status: ReviewStatus,
}

impl ReviewVerdict {
    pub fn requires_review(&self) -> bool {
        self.status == ReviewStatus::RequiresReview
    }
}

/// Pattern-based instruction scorer.
#[derive(Debug, Clone)]
pub struct RiskGate {
    patterns: Vec<(RiskCategory, Regex)>,
    threshold: f64,
    mode: ReviewMode,
}

impl RiskGate {
    /// Build a gate with the default threshold in advisory mode.
    pub fn new() -> Result<Self, RiskError> {
        Self::with_policy(DEFAULT_REVIEW_THRESHOLD, ReviewMode::Advisory)
    }

    pub fn with_policy(threshold: f64, mode: ReviewMode) -> Result<Self, RiskError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(RiskError::Threshold(threshold));
        }
        let patterns = vec![
            (
                RiskCategory::FundsTransfer,
                Regex::new(r"(?i)\btransfer\b.*\b\$?\d+")?,
            ),
            (
                RiskCategory::AccountDeletion,
                Regex::new(r"(?i)\bdelete\b.*\baccount\b")?,
            ),
            (
                RiskCategory::ShellExecution,
                Regex::new(r"(?i)\bexecute\b.*\bshell\b")?,
            ),
        ];
        Ok(Self {
            patterns,
            threshold,
            mode,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn mode(&self) -> ReviewMode {
        self.mode
    }

    /// Categories whose pattern appears in `instruction`, in fixed order.
    pub fn matched_categories(&self, instruction: &str) -> Vec<RiskCategory> {
        self.patterns
            .iter()
            .filter(|(_, re)| re.is_match(instruction))
            .map(|(category, _)| *category)
            .collect()
    }

    /// Risk score in [0, 1].
    pub fn score(&self, instruction: &str) -> f64 {
        weighted_score(self.matched_categories(instruction).len())
    }

    pub fn requires_review(&self, score: f64) -> bool {
        score >= self.threshold
    }

    pub fn assess(&self, instruction: &str) -> ReviewVerdict {
        let categories = self.matched_categories(instruction);
        let score = weighted_score(categories.len());
        let status = if self.requires_review(score) {
            ReviewStatus::RequiresReview
        } else {
            ReviewStatus::AutoApproved
        };
        ReviewVerdict {
            score,
            categories,
            status,
        }
    }
}

fn weighted_score(matched: usize) -> f64 {
    (matched as f64 * CATEGORY_WEIGHT).min(1.0)
}
