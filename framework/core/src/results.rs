//! On-disk result file contract between the engine and the stats parser.
//!
//! The engine writes two CSV files when a run finishes; the orchestrator
//! parses them after the child exits. Like [`crate::protocol`], the names
//! live here so the writer and the reader share one definition.

/// Suffix of the per-target stats table, appended to the `--csv` prefix.
pub const STATS_SUFFIX: &str = "_stats.csv";

/// Suffix of the time-series table, appended to the `--csv` prefix.
pub const HISTORY_SUFFIX: &str = "_stats_history.csv";

/// Name of the run-wide summary row, distinguishing it from per-target rows.
pub const AGGREGATE_NAME: &str = "Aggregated";

/// Column names used by both result files.
pub mod columns {
    pub const TYPE: &str = "Type";
    pub const NAME: &str = "Name";
    pub const REQUEST_COUNT: &str = "Request Count";
    pub const FAILURE_COUNT: &str = "Failure Count";
    pub const MEDIAN: &str = "50%";
    pub const P95: &str = "95%";
    pub const P99: &str = "99%";
    pub const MAX: &str = "Max";
    pub const AVERAGE: &str = "Average (ms)";
    pub const RPS: &str = "Requests/s";
    pub const FAILURES_PER_SEC: &str = "Failures/s";
    pub const TIMESTAMP: &str = "Timestamp";
    pub const USER_COUNT: &str = "User Count";
}

/// File name of the stats table for a given prefix.
pub fn stats_file_name(prefix: &str) -> String {
    format!("{prefix}{STATS_SUFFIX}")
}

/// File name of the history table for a given prefix.
pub fn history_file_name(prefix: &str) -> String {
    format!("{prefix}{HISTORY_SUFFIX}")
}
