use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use parking_lot::Mutex;
use tabled::{Table, Tabled};

use siteload_core::results::columns;
use siteload_core::results::AGGREGATE_NAME;

/// Collects request outcomes from every simulated user and renders them into
/// the run's result files.
///
/// Recording is cheap (one lock, one push); all derivations happen at
/// sampling or write time.
pub struct StatsRegistry {
    inner: Mutex<Inner>,
}

struct Inner {
    targets: BTreeMap<String, TargetStats>,
    window_requests: u64,
    window_failures: u64,
    history: Vec<HistoryRow>,
    started: Instant,
}

struct TargetStats {
    method: String,
    requests: u64,
    failures: u64,
    latencies_ms: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub timestamp: i64,
    pub users: u32,
    pub rps: f64,
    pub failures_per_sec: f64,
    pub median_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

/// Run-wide totals for the final banner.
#[derive(Debug, Clone, PartialEq)]
pub struct RunTotals {
    pub requests: u64,
    pub failures: u64,
    pub failure_rate_pct: f64,
    pub median_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub rps: f64,
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                targets: BTreeMap::new(),
                window_requests: 0,
                window_failures: 0,
                history: Vec::new(),
                started: Instant::now(),
            }),
        }
    }

    pub fn record(&self, name: &str, method: &str, latency_ms: u64, failed: bool) {
        let mut inner = self.inner.lock();
        let target = inner
            .targets
            .entry(name.to_string())
            .or_insert_with(|| TargetStats {
                method: method.to_string(),
                requests: 0,
                failures: 0,
                latencies_ms: Vec::new(),
            });
        target.requests += 1;
        if failed {
            target.failures += 1;
        }
        target.latencies_ms.push(latency_ms);

        inner.window_requests += 1;
        if failed {
            inner.window_failures += 1;
        }
    }

    /// Take one time-series sample covering the window since the last sample.
    pub fn sample(&self, users: u32, window_secs: f64) {
        let mut inner = self.inner.lock();
        let window_secs = window_secs.max(f64::EPSILON);
        let rps = inner.window_requests as f64 / window_secs;
        let failures_per_sec = inner.window_failures as f64 / window_secs;
        inner.window_requests = 0;
        inner.window_failures = 0;

        let latencies = inner.merged_latencies();
        let row = HistoryRow {
            timestamp: chrono::Utc::now().timestamp(),
            users,
            rps,
            failures_per_sec,
            median_ms: percentile(&latencies, 50.0),
            p95_ms: percentile(&latencies, 95.0),
            p99_ms: percentile(&latencies, 99.0),
        };
        inner.history.push(row);
    }

    pub fn totals(&self) -> RunTotals {
        let inner = self.inner.lock();
        let requests: u64 = inner.targets.values().map(|t| t.requests).sum();
        let failures: u64 = inner.targets.values().map(|t| t.failures).sum();
        let latencies = inner.merged_latencies();
        let elapsed = inner.started.elapsed().as_secs_f64().max(f64::EPSILON);

        RunTotals {
            requests,
            failures,
            failure_rate_pct: failure_rate_pct(requests, failures),
            median_ms: percentile(&latencies, 50.0),
            p95_ms: percentile(&latencies, 95.0),
            max_ms: latencies.last().copied(),
            rps: requests as f64 / elapsed,
        }
    }

    /// Write the per-target stats table, with the aggregate sentinel row last.
    pub fn write_stats_csv(&self, path: &Path) -> anyhow::Result<()> {
        let inner = self.inner.lock();
        let elapsed = inner.started.elapsed().as_secs_f64().max(f64::EPSILON);
        let mut out = BufWriter::new(File::create(path)?);

        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{}",
            columns::TYPE,
            columns::NAME,
            columns::REQUEST_COUNT,
            columns::FAILURE_COUNT,
            columns::MEDIAN,
            columns::P95,
            columns::MAX,
            columns::AVERAGE,
            columns::RPS,
        )?;

        for (name, target) in &inner.targets {
            let mut sorted = target.latencies_ms.clone();
            sorted.sort_unstable();
            writeln!(
                out,
                "{},{},{},{},{},{},{},{},{:.6}",
                csv_field(&target.method),
                csv_field(name),
                target.requests,
                target.failures,
                fmt_ms(percentile(&sorted, 50.0)),
                fmt_ms(percentile(&sorted, 95.0)),
                fmt_ms(sorted.last().copied()),
                fmt_avg(&sorted),
                target.requests as f64 / elapsed,
            )?;
        }

        let latencies = inner.merged_latencies();
        let requests: u64 = inner.targets.values().map(|t| t.requests).sum();
        let failures: u64 = inner.targets.values().map(|t| t.failures).sum();
        writeln!(
            out,
            ",{},{},{},{},{},{},{},{:.6}",
            AGGREGATE_NAME,
            requests,
            failures,
            fmt_ms(percentile(&latencies, 50.0)),
            fmt_ms(percentile(&latencies, 95.0)),
            fmt_ms(latencies.last().copied()),
            fmt_avg(&latencies),
            requests as f64 / elapsed,
        )?;

        out.flush()?;
        Ok(())
    }

    /// Write the time-series table, one aggregate-named row per sample.
    pub fn write_history_csv(&self, path: &Path) -> anyhow::Result<()> {
        let inner = self.inner.lock();
        let mut out = BufWriter::new(File::create(path)?);

        writeln!(
            out,
            "{},{},{},{},{},{},{},{}",
            columns::TIMESTAMP,
            columns::USER_COUNT,
            columns::NAME,
            columns::RPS,
            columns::FAILURES_PER_SEC,
            columns::MEDIAN,
            columns::P95,
            columns::P99,
        )?;

        for row in &inner.history {
            writeln!(
                out,
                "{},{},{},{:.2},{:.2},{},{},{}",
                row.timestamp,
                row.users,
                AGGREGATE_NAME,
                row.rps,
                row.failures_per_sec,
                fmt_ms(row.median_ms),
                fmt_ms(row.p95_ms),
                fmt_ms(row.p99_ms),
            )?;
        }

        out.flush()?;
        Ok(())
    }

    /// Render the per-target summary printed at the end of a run.
    pub fn summary_table(&self) -> String {
        let inner = self.inner.lock();
        let elapsed = inner.started.elapsed().as_secs_f64().max(f64::EPSILON);

        let rows = inner
            .targets
            .iter()
            .map(|(name, target)| {
                let mut sorted = target.latencies_ms.clone();
                sorted.sort_unstable();
                TargetRow {
                    name: name.clone(),
                    requests: target.requests,
                    failures: target.failures,
                    median_ms: fmt_ms(percentile(&sorted, 50.0)),
                    p95_ms: fmt_ms(percentile(&sorted, 95.0)),
                    max_ms: fmt_ms(sorted.last().copied()),
                    rps: target.requests as f64 / elapsed,
                }
            })
            .collect::<Vec<_>>();

        let mut table = Table::new(&rows);
        table.with(tabled::settings::Style::modern());
        table.to_string()
    }
}

impl Inner {
    fn merged_latencies(&self) -> Vec<u64> {
        let mut merged = self
            .targets
            .values()
            .flat_map(|t| t.latencies_ms.iter().copied())
            .collect::<Vec<_>>();
        merged.sort_unstable();
        merged
    }
}

#[derive(Tabled)]
struct TargetRow {
    name: String,
    requests: u64,
    failures: u64,
    median_ms: String,
    p95_ms: String,
    max_ms: String,
    #[tabled(display = "float2")]
    rps: f64,
}

fn float2(n: &f64) -> String {
    format!("{:.2}", n)
}

/// Nearest-rank percentile over an already sorted sample set.
fn percentile(sorted_ms: &[u64], pct: f64) -> Option<u64> {
    if sorted_ms.is_empty() {
        return None;
    }
    let rank = ((pct / 100.0) * sorted_ms.len() as f64).ceil() as usize;
    Some(sorted_ms[rank.clamp(1, sorted_ms.len()) - 1])
}

pub(crate) fn failure_rate_pct(requests: u64, failures: u64) -> f64 {
    if requests == 0 {
        return 0.0;
    }
    (failures as f64 / requests as f64 * 100.0 * 100.0).round() / 100.0
}

fn fmt_ms(value: Option<u64>) -> String {
    match value {
        Some(ms) => ms.to_string(),
        None => "N/A".to_string(),
    }
}

fn fmt_avg(sorted_ms: &[u64]) -> String {
    if sorted_ms.is_empty() {
        return "N/A".to_string();
    }
    let sum: u64 = sorted_ms.iter().sum();
    format!("{:.2}", sum as f64 / sorted_ms.len() as f64)
}

/// Quote a CSV field when it contains a delimiter, quote or newline.
fn csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
