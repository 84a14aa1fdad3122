// ABOUTME: SQLite-backed Feedback Store holding per-(pipeline, variant) success/failure counters.
// ABOUTME: Counter upserts run in an immediate transaction; every outcome is also appended to an audit log.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use aegis_core::metrics::{self, Metrics};
use aegis_core::variant::{self, CANDIDATE_LIMIT, MIN_TRIALS};
use aegis_core::{FeedbackRecord, VariantStat};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use thiserror::Error;
use ulid::Ulid;

/// Errors that can occur during feedback store operations.
#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid stored value: {0}")]
    Corrupt(String),

    #[error("feedback connection lock poisoned")]
    Poisoned,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS ab_stats (
        pipeline TEXT NOT NULL,
        variant TEXT NOT NULL,
        success INTEGER NOT NULL DEFAULT 0,
        failure INTEGER NOT NULL DEFAULT 0,
        updated TEXT NOT NULL,
        PRIMARY KEY (pipeline, variant)
    );

    CREATE TABLE IF NOT EXISTS feedback_log (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        record_id TEXT NOT NULL,
        pipeline TEXT NOT NULL,
        variant TEXT NOT NULL,
        tool_name TEXT NOT NULL,
        inputs TEXT NOT NULL,
        output TEXT NOT NULL,
        success INTEGER NOT NULL,
        error_message TEXT,
        timestamp TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS feedback_log_pipeline ON feedback_log (pipeline);";

/// Counters and audit log for variant outcomes. Owns a single connection;
/// callers share the store through an `Arc`.
pub struct FeedbackStore {
    conn: Mutex<Connection>,
    metrics: Arc<Metrics>,
}

impl FeedbackStore {
    /// Open or create the feedback database at `path`, creating parent
    /// directories and the schema as needed.
    pub fn open(path: &Path, metrics: Arc<Metrics>) -> Result<Self, FeedbackError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn, metrics)
    }

    /// A private in-memory store, used by tests and dry runs.
    pub fn in_memory(metrics: Arc<Metrics>) -> Result<Self, FeedbackError> {
        Self::init(Connection::open_in_memory()?, metrics)
    }

    fn init(conn: Connection, metrics: Arc<Metrics>) -> Result<Self, FeedbackError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            metrics,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, FeedbackError> {
        self.conn.lock().map_err(|_| FeedbackError::Poisoned)
    }

    /// Increment exactly one counter of the record's (pipeline, variant) row
    /// and append the record to the audit log, atomically.
    pub fn try_record(&self, record: &FeedbackRecord) -> Result<(), FeedbackError> {
        self.metrics.inc_counter(
            metrics::VARIANT_OUTCOME_TOTAL,
            &[
                ("pipeline_id", record.pipeline_id.as_str()),
                ("variant", record.variant.as_str()),
            ],
        );

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now().to_rfc3339();

        let current: Option<(i64, i64)> = tx
            .query_row(
                "SELECT success, failure FROM ab_stats WHERE pipeline = ?1 AND variant = ?2",
                params![record.pipeline_id, record.variant],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match current {
            Some((success, failure)) => {
                let (success, failure) = if record.success {
                    (success + 1, failure)
                } else {
                    (success, failure + 1)
                };
                tx.execute(
                    "UPDATE ab_stats SET success = ?1, failure = ?2, updated = ?3
                     WHERE pipeline = ?4 AND variant = ?5",
                    params![success, failure, now, record.pipeline_id, record.variant],
                )?;
            }
            None => {
                let (success, failure) = if record.success { (1, 0) } else { (0, 1) };
                tx.execute(
                    "INSERT INTO ab_stats (pipeline, variant, success, failure, updated)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![record.pipeline_id, record.variant, success, failure, now],
                )?;
            }
        }

        insert_log_row(&tx, record)?;
        tx.commit()?;

        tracing::debug!(
            pipeline_id = %record.pipeline_id,
            variant = %record.variant,
            success = record.success,
            tool = %record.tool_name,
            "feedback recorded"
        );
        Ok(())
    }

    /// Best-effort `try_record`: failures are logged and dropped.
    pub fn record(&self, record: &FeedbackRecord) {
        if let Err(e) = self.try_record(record) {
            tracing::warn!(
                pipeline_id = %record.pipeline_id,
                variant = %record.variant,
                tool = %record.tool_name,
                error = %e,
                "could not record feedback"
            );
        }
    }

    /// Append an audit row without touching the counters.
    pub fn log_execution(&self, record: &FeedbackRecord) -> Result<(), FeedbackError> {
        let conn = self.lock()?;
        insert_log_row(&conn, record)?;
        Ok(())
    }

    /// Variant to run next for `pipeline_id`: the best-rated of the top
    /// candidates with enough trials, otherwise `default`.
    pub fn best_variant(&self, pipeline_id: &str, default: &str) -> Result<String, FeedbackError> {
        let candidates = self.top_candidates(pipeline_id)?;
        let chosen = variant::select_best(&candidates, default);
        match candidates
            .iter()
            .find(|s| s.variant == chosen && s.trials() >= MIN_TRIALS)
        {
            Some(stat) => tracing::info!(
                pipeline_id,
                variant = %chosen,
                rate = stat.success_rate().unwrap_or(0.0),
                trials = stat.trials(),
                "best variant selected"
            ),
            None => tracing::info!(
                pipeline_id,
                variant = %chosen,
                candidates = candidates.len(),
                "no variant met criteria, using default"
            ),
        }
        Ok(chosen)
    }

    fn top_candidates(&self, pipeline_id: &str) -> Result<Vec<VariantStat>, FeedbackError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT pipeline, variant, success, failure, updated,
                    (success * 1.0) / NULLIF(success + failure, 0) AS rate,
                    (success + failure) AS n
             FROM ab_stats
             WHERE pipeline = ?1 AND (success + failure) > 0
             ORDER BY rate DESC, n DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![pipeline_id, CANDIDATE_LIMIT as i64], stat_columns)?;
        collect_stats(rows)
    }

    /// Every counter row for a pipeline, ordered by variant name.
    pub fn stats(&self, pipeline_id: &str) -> Result<Vec<VariantStat>, FeedbackError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT pipeline, variant, success, failure, updated
             FROM ab_stats WHERE pipeline = ?1 ORDER BY variant ASC",
        )?;
        let rows = stmt.query_map(params![pipeline_id], stat_columns)?;
        collect_stats(rows)
    }

    pub fn stat(&self, pipeline_id: &str, variant: &str) -> Result<Option<VariantStat>, FeedbackError> {
        Ok(self
            .stats(pipeline_id)?
            .into_iter()
            .find(|s| s.variant == variant))
    }

    /// Audit records for a pipeline in insertion order.
    pub fn history(&self, pipeline_id: &str) -> Result<Vec<FeedbackRecord>, FeedbackError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT record_id, pipeline, variant, tool_name, inputs, output, success, error_message, timestamp
             FROM feedback_log WHERE pipeline = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![pipeline_id], |row| {
            Ok(LogRow {
                record_id: row.get(0)?,
                pipeline_id: row.get(1)?,
                variant: row.get(2)?,
                tool_name: row.get(3)?,
                inputs: row.get(4)?,
                output: row.get(5)?,
                success: row.get(6)?,
                error_message: row.get(7)?,
                timestamp: row.get(8)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }
}

fn insert_log_row(conn: &Connection, record: &FeedbackRecord) -> Result<(), FeedbackError> {
    conn.execute(
        "INSERT INTO feedback_log
            (record_id, pipeline, variant, tool_name, inputs, output, success, error_message, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.record_id.to_string(),
            record.pipeline_id,
            record.variant,
            record.tool_name,
            serde_json::to_string(&record.inputs)?,
            serde_json::to_string(&record.output)?,
            record.success,
            record.error_message,
            record.timestamp.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Raw counter row, converted to `VariantStat` outside the rusqlite closure.
struct StatRow {
    pipeline_id: String,
    variant: String,
    success: i64,
    failure: i64,
    updated: String,
}

fn stat_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<StatRow> {
    Ok(StatRow {
        pipeline_id: row.get(0)?,
        variant: row.get(1)?,
        success: row.get(2)?,
        failure: row.get(3)?,
        updated: row.get(4)?,
    })
}

fn collect_stats(
    rows: impl Iterator<Item = rusqlite::Result<StatRow>>,
) -> Result<Vec<VariantStat>, FeedbackError> {
    let mut stats = Vec::new();
    for row in rows {
        let row = row?;
        stats.push(VariantStat {
            pipeline_id: row.pipeline_id,
            variant: row.variant,
            success: to_count(row.success)?,
            failure: to_count(row.failure)?,
            updated_at: parse_timestamp(&row.updated)?,
        });
    }
    Ok(stats)
}

fn to_count(value: i64) -> Result<u64, FeedbackError> {
    u64::try_from(value).map_err(|_| FeedbackError::Corrupt(format!("negative counter {value}")))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, FeedbackError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FeedbackError::Corrupt(format!("timestamp {value:?}: {e}")))
}

struct LogRow {
    record_id: String,
    pipeline_id: String,
    variant: String,
    tool_name: String,
    inputs: String,
    output: String,
    success: bool,
    error_message: Option<String>,
    timestamp: String,
}

impl LogRow {
    fn into_record(self) -> Result<FeedbackRecord, FeedbackError> {
        let record_id = self
            .record_id
            .parse::<Ulid>()
            .map_err(|e| FeedbackError::Corrupt(format!("record id {:?}: {e}", self.record_id)))?;
        Ok(FeedbackRecord {
            record_id,
            pipeline_id: self.pipeline_id,
            variant: self.variant,
            tool_name: self.tool_name,
            inputs: serde_json::from_str(&self.inputs)?,
            output: serde_json::from_str(&self.output)?,
            success: self.success,
            error_message: self.error_message,
            timestamp: parse_timestamp(&self.timestamp)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> FeedbackStore {
        FeedbackStore::in_memory(Arc::new(Metrics::new())).unwrap()
    }

    fn record_n(store: &FeedbackStore, pipeline: &str, variant: &str, success: bool, n: usize) {
        for _ in 0..n {
            store
                .try_record(&FeedbackRecord::new(pipeline, variant, success))
                .unwrap();
        }
    }

    #[test]
    fn first_success_inserts_one_zero() {
        let s = store();
        s.try_record(&FeedbackRecord::new("pipe1", "varA", true).tool("TestTool"))
            .unwrap();
        let stat = s.stat("pipe1", "varA").unwrap().unwrap();
        assert_eq!((stat.success, stat.failure), (1, 0));
    }

    #[test]
    fn first_failure_inserts_zero_one() {
        let s = store();
        s.try_record(&FeedbackRecord::new("pipe1", "varB", false)).unwrap();
        let stat = s.stat("pipe1", "varB").unwrap().unwrap();
        assert_eq!((stat.success, stat.failure), (0, 1));
    }

    #[test]
    fn repeated_records_accumulate() {
        let s = store();
        record_n(&s, "pipe2", "varA", true, 3);
        record_n(&s, "pipe2", "varA", false, 1);
        let stat = s.stat("pipe2", "varA").unwrap().unwrap();
        assert_eq!((stat.success, stat.failure), (3, 1));
        assert_eq!(stat.trials(), 4);
    }

    #[test]
    fn record_increments_variant_metric() {
        let registry = Arc::new(Metrics::new());
        let s = FeedbackStore::in_memory(Arc::clone(&registry)).unwrap();
        s.record(&FeedbackRecord::new("p", "A", true));
        s.record(&FeedbackRecord::new("p", "A", false));
        assert_eq!(
            registry.counter(
                metrics::VARIANT_OUTCOME_TOTAL,
                &[("pipeline_id", "p"), ("variant", "A")]
            ),
            2
        );
    }

    #[test]
    fn best_variant_defaults_without_data() {
        let s = store();
        assert_eq!(s.best_variant("pipe_empty", "default_val").unwrap(), "default_val");
    }

    #[test]
    fn best_variant_needs_twenty_trials() {
        let s = store();
        record_n(&s, "pipe_few", "varX", true, 10);
        record_n(&s, "pipe_few", "varX", false, 9);
        assert_eq!(s.best_variant("pipe_few", "default_X").unwrap(), "default_X");

        record_n(&s, "pipe_few", "varX", true, 1);
        assert_eq!(s.best_variant("pipe_few", "default_X").unwrap(), "varX");
    }

    #[test]
    fn twenty_successes_select_variant() {
        let s = store();
        record_n(&s, "P", "A", true, 20);
        assert_eq!(s.best_variant("P", "default").unwrap(), "A");
    }

    #[test]
    fn best_variant_prefers_rate_among_confident() {
        let s = store();
        record_n(&s, "pipe_multi", "varA", true, 20);
        record_n(&s, "pipe_multi", "varB", true, 20);
        record_n(&s, "pipe_multi", "varB", false, 5);
        record_n(&s, "pipe_multi", "varC", true, 10);
        assert_eq!(s.best_variant("pipe_multi", "def").unwrap(), "varA");
    }

    #[test]
    fn best_variant_tie_breaks_on_trials() {
        let s = store();
        record_n(&s, "pipe_tie", "varA", true, 18);
        record_n(&s, "pipe_tie", "varA", false, 2);
        record_n(&s, "pipe_tie", "varB", true, 27);
        record_n(&s, "pipe_tie", "varB", false, 3);
        assert_eq!(s.best_variant("pipe_tie", "def").unwrap(), "varB");
    }

    #[test]
    fn best_variant_is_scoped_to_pipeline() {
        let s = store();
        record_n(&s, "other", "A", true, 25);
        assert_eq!(s.best_variant("mine", "default").unwrap(), "default");
    }

    #[test]
    fn concurrent_records_lose_no_increments() {
        let dir = TempDir::new().unwrap();
        let s = Arc::new(
            FeedbackStore::open(&dir.path().join("feedback.db"), Arc::new(Metrics::new())).unwrap(),
        );

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let s = Arc::clone(&s);
                scope.spawn(move || {
                    for i in 0..25 {
                        // Workers interleave successes and failures on one key.
                        let success = (worker + i) % 3 != 0;
                        s.try_record(&FeedbackRecord::new("hot", "A", success)).unwrap();
                    }
                });
            }
        });

        let expected_success = (0..8)
            .flat_map(|w| (0..25).map(move |i| (w + i) % 3 != 0))
            .filter(|ok| *ok)
            .count() as u64;
        let stat = s.stat("hot", "A").unwrap().unwrap();
        assert_eq!(stat.success, expected_success);
        assert_eq!(stat.failure, 200 - expected_success);
    }

    #[test]
    fn audit_log_keeps_every_record() {
        let s = store();
        let start = FeedbackRecord::new("p", "default", true)
            .tool("PipelineStart")
            .inputs(json!({"graph_id": "p"}));
        let end = FeedbackRecord::new("p", "default", false)
            .tool("PipelineEnd")
            .output(json!({"t1": {"error": "boom"}}))
            .error(Some("Error in task t1: boom".into()));
        s.try_record(&start).unwrap();
        s.try_record(&end).unwrap();
        s.try_record(&end).unwrap();

        let history = s.history("p").unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0], start);
        assert_eq!(history[1].tool_name, "PipelineEnd");
        assert_eq!(history[2].record_id, end.record_id);
    }

    #[test]
    fn log_execution_leaves_counters_alone() {
        let s = store();
        s.log_execution(&FeedbackRecord::new("p", "A", true).tool("SlackAPI"))
            .unwrap();
        assert!(s.stat("p", "A").unwrap().is_none());
        assert_eq!(s.history("p").unwrap().len(), 1);
    }

    #[test]
    fn reopening_file_keeps_counters() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("feedback.db");
        {
            let s = FeedbackStore::open(&path, Arc::new(Metrics::new())).unwrap();
            record_n(&s, "p", "A", true, 2);
        }
        let s = FeedbackStore::open(&path, Arc::new(Metrics::new())).unwrap();
        let stat = s.stat("p", "A").unwrap().unwrap();
        assert_eq!(stat.success, 2);
    }
}
