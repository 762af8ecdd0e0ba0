use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::report::AggregateRecord;

/// What gets offered to durable storage after a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Run id, assigned by the supervisor.
    pub id: String,
    pub domain: String,
    pub total_requests: u64,
    pub failures: u64,
    pub error_rate: f64,
    pub avg_rps: f64,
    pub p95_latency: f64,
    /// Full aggregate, kept alongside the headline numbers.
    pub aggregate: AggregateRecord,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

impl ScanRecord {
    pub fn new(
        id: String,
        domain: String,
        owner_id: String,
        aggregate: AggregateRecord,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            domain,
            total_requests: aggregate.requests,
            failures: aggregate.failures,
            error_rate: aggregate.failure_rate_pct,
            avg_rps: aggregate.rps,
            p95_latency: aggregate.p95_ms,
            aggregate,
            owner_id,
            created_at,
        }
    }
}

/// Durable-storage collaborator.
///
/// The supervisor offers the record after the terminal status has already
/// been broadcast; an implementation may fail, and the failure is logged and
/// swallowed, never surfaced as a run error.
pub trait ScanStore: Send + Sync {
    fn persist(&self, record: &ScanRecord) -> anyhow::Result<()>;
}

/// Reference store: one JSON object per line, appended to a file.
pub struct JsonLinesStore {
    path: PathBuf,
}

impl JsonLinesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ScanStore for JsonLinesStore {
    fn persist(&self, record: &ScanRecord) -> anyhow::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_aggregate() -> AggregateRecord {
        AggregateRecord {
            requests: 150,
            failures: 5,
            failure_rate_pct: 3.33,
            median_ms: 45.0,
            p95_ms: 110.0,
            max_ms: 400.0,
            avg_ms: 60.0,
            rps: 15.7,
        }
    }

    #[test]
    fn record_headline_numbers_come_from_the_aggregate() {
        let record = ScanRecord::new(
            "run-1".to_string(),
            "https://example.com".to_string(),
            "user-1".to_string(),
            sample_aggregate(),
            Utc::now(),
        );
        assert_eq!(record.total_requests, 150);
        assert_eq!(record.failures, 5);
        assert_eq!(record.error_rate, 3.33);
        assert_eq!(record.p95_latency, 110.0);
    }

    #[test]
    fn json_lines_store_appends_one_parseable_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scans.jsonl");
        let store = JsonLinesStore::new(&path);

        for n in 0..2 {
            let record = ScanRecord::new(
                format!("run-{n}"),
                "https://example.com".to_string(),
                "user-1".to_string(),
                sample_aggregate(),
                Utc::now(),
            );
            store.persist(&record).unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: ScanRecord = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.owner_id, "user-1");
        }
    }
}
