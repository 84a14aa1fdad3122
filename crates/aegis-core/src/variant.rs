// ABOUTME: Variant statistics, feedback records, and the greedy best-variant selection policy.
// ABOUTME: Selection orders by success rate then trial count and requires a minimum number of trials.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// A variant is only trusted once it has at least this many recorded outcomes.
pub const MIN_TRIALS: u64 = 20;

/// At most this many ranked candidates are considered per pipeline.
pub const CANDIDATE_LIMIT: usize = 5;

/// Success/failure counters for one (pipeline, variant) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantStat {
    pub pipeline_id: String,
    pub variant: String,
    pub success: u64,
    pub failure: u64,
    pub updated_at: DateTime<Utc>,
}

impl VariantStat {
    pub fn trials(&self) -> u64 {
        self.success + self.failure
    }

    /// `None` for a variant with no trials.
    pub fn success_rate(&self) -> Option<f64> {
        match self.trials() {
            0 => None,
            n => Some(self.success as f64 / n as f64),
        }
    }
}

/// Order stats the way candidates are ranked: rate descending, then trials
/// descending. Zero-trial rows are dropped and the result is truncated to
/// `CANDIDATE_LIMIT`.
pub fn rank_candidates(stats: &[VariantStat]) -> Vec<&VariantStat> {
    let mut ranked: Vec<(&VariantStat, f64)> = stats
        .iter()
        .filter_map(|s| s.success_rate().map(|r| (s, r)))
        .collect();
    ranked.sort_by(|(a, ra), (b, rb)| {
        rb.partial_cmp(ra)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.trials().cmp(&a.trials()))
    });
    ranked
        .into_iter()
        .take(CANDIDATE_LIMIT)
        .map(|(s, _)| s)
        .collect()
}

/// Greedy "exploit once confident" choice: the first ranked candidate with
/// at least `MIN_TRIALS`, or `default` when none qualifies.
pub fn select_best(stats: &[VariantStat], default: &str) -> String {
    rank_candidates(stats)
        .into_iter()
        .find(|s| s.trials() >= MIN_TRIALS)
        .map(|s| s.variant.clone())
        .unwrap_or_else(|| default.to_string())
}

fn default_tool_name() -> String {
    "N/A".to_string()
}

/// Append-only audit entry describing one execution outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub record_id: Ulid,
    pub pipeline_id: String,
    pub variant: String,
    #[serde(default = "default_tool_name")]
    pub tool_name: String,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub output: Value,
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn new(pipeline_id: impl Into<String>, variant: impl Into<String>, success: bool) -> Self {
        Self {
            record_id: Ulid::new(),
            pipeline_id: pipeline_id.into(),
            variant: variant.into(),
            tool_name: default_tool_name(),
            inputs: Value::Null,
            output: Value::Null,
            success,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = tool_name.into();
        self
    }

    pub fn inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    pub fn error(mut self, message: Option<String>) -> Self {
        self.error_message = message;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(variant: &str, success: u64, failure: u64) -> VariantStat {
        VariantStat {
            pipeline_id: "p".to_string(),
            variant: variant.to_string(),
            success,
            failure,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn empty_stats_select_default() {
        assert_eq!(select_best(&[], "default"), "default");
    }

    #[test]
    fn below_min_trials_selects_default() {
        let stats = vec![stat("A", 19, 0), stat("B", 5, 5)];
        assert_eq!(select_best(&stats, "fallback"), "fallback");
    }

    #[test]
    fn exactly_min_trials_is_trusted() {
        let stats = vec![stat("A", 20, 0)];
        assert_eq!(select_best(&stats, "default"), "A");
    }

    #[test]
    fn highest_rate_with_enough_trials_wins() {
        // C has the best rate but too few trials; A beats B on rate.
        let stats = vec![stat("B", 20, 5), stat("A", 20, 0), stat("C", 10, 0)];
        assert_eq!(select_best(&stats, "def"), "A");
    }

    #[test]
    fn equal_rate_breaks_tie_on_trial_count() {
        let stats = vec![stat("small", 18, 2), stat("large", 27, 3)];
        assert_eq!(select_best(&stats, "def"), "large");

        let ranked = rank_candidates(&stats);
        assert_eq!(ranked[0].variant, "large");
        assert_eq!(ranked[1].variant, "small");
    }

    #[test]
    fn zero_trial_rows_are_excluded() {
        let stats = vec![stat("empty", 0, 0), stat("A", 1, 0)];
        let ranked = rank_candidates(&stats);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].variant, "A");
        assert_eq!(stat("empty", 0, 0).success_rate(), None);
    }

    #[test]
    fn candidates_truncate_to_limit() {
        // Six low-volume perfect variants outrank the confident one and push
        // it beyond the candidate window.
        let mut stats: Vec<VariantStat> = (0..6).map(|i| stat(&format!("v{i}"), 1, 0)).collect();
        stats.push(stat("confident", 40, 10));
        assert_eq!(rank_candidates(&stats).len(), CANDIDATE_LIMIT);
        assert_eq!(select_best(&stats, "default"), "default");
    }

    #[test]
    fn feedback_record_builder_defaults() {
        let rec = FeedbackRecord::new("p", "v", true);
        assert_eq!(rec.tool_name, "N/A");
        assert!(rec.inputs.is_null());
        assert!(rec.error_message.is_none());

        let rec = rec.tool("PipelineEnd").error(Some("boom".into()));
        assert_eq!(rec.tool_name, "PipelineEnd");
        assert_eq!(rec.error_message.as_deref(), Some("boom"));
    }
}
