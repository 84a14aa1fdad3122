// ABOUTME: In-process metrics surface with labelled counters and histograms.
// ABOUTME: Owned explicitly by the orchestrator context; renders a Prometheus-style text snapshot.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard};

/// Tasks executed, labelled by `task_id`.
pub const TASK_TOTAL: &str = "agent_task_total";
/// Task execution time in seconds, labelled by `task_id`.
pub const TASK_DURATION_SECONDS: &str = "agent_task_duration_seconds";
/// Recorded outcomes, labelled by `pipeline_id` and `variant`.
pub const VARIANT_OUTCOME_TOTAL: &str = "variant_success_total";
/// Estimated cost per pipeline run, labelled by `flow_id`.
pub const FLOW_COST_USD: &str = "flow_cost_usd";

type Labels = Vec<(String, String)>;
type SeriesKey = (String, Labels);

fn series_key(name: &str, labels: &[(&str, &str)]) -> SeriesKey {
    let mut labels: Labels = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    labels.sort();
    (name.to_string(), labels)
}

/// Count and sum of observations for one histogram series.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
}

#[derive(Debug, Default)]
struct Series {
    counters: BTreeMap<SeriesKey, u64>,
    histograms: BTreeMap<SeriesKey, HistogramSnapshot>,
}

#[derive(Debug, Default)]
pub struct Metrics {
    series: Mutex<Series>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means another thread panicked mid-update; the
    // counters themselves are still usable.
    fn lock(&self) -> MutexGuard<'_, Series> {
        self.series.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn inc_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let mut series = self.lock();
        *series.counters.entry(series_key(name, labels)).or_insert(0) += 1;
        tracing::trace!(metric = name, "counter incremented");
    }

    pub fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let mut series = self.lock();
        let hist = series.histograms.entry(series_key(name, labels)).or_default();
        hist.count += 1;
        hist.sum += value;
        tracing::trace!(metric = name, value, "histogram observed");
    }

    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.lock()
            .counters
            .get(&series_key(name, labels))
            .copied()
            .unwrap_or(0)
    }

    pub fn histogram(&self, name: &str, labels: &[(&str, &str)]) -> Option<HistogramSnapshot> {
        self.lock().histograms.get(&series_key(name, labels)).copied()
    }

    /// Text exposition of every series, counters first.
    pub fn render(&self) -> String {
        let series = self.lock();
        let mut out = String::new();
        for ((name, labels), value) in &series.counters {
            let _ = writeln!(out, "{}{} {}", name, format_labels(labels), value);
        }
        for ((name, labels), hist) in &series.histograms {
            let labels = format_labels(labels);
            let _ = writeln!(out, "{}_count{} {}", name, labels, hist.count);
            let _ = writeln!(out, "{}_sum{} {}", name, labels, hist.sum);
        }
        out
    }
}

fn format_labels(labels: &Labels) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let inner: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v.replace('"', "\\\"")))
        .collect();
    format!("{{{}}}", inner.join(","))
}
