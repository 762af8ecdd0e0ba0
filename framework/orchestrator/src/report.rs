use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

use siteload_core::results::{self, columns};

/// Run-wide summary parsed from the sentinel aggregate row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub requests: u64,
    pub failures: u64,
    /// Derived, never read from the file: `failures / requests * 100`,
    /// rounded to two decimals, `0` when there were no requests.
    pub failure_rate_pct: f64,
    pub median_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub rps: f64,
}

/// One per-target row of the stats table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub name: String,
    pub method: String,
    pub requests: u64,
    pub failures: u64,
    pub median_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
    pub rps: f64,
}

/// One time-series sample from the history table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: i64,
    pub users: u64,
    pub rps: f64,
    pub failures_per_sec: f64,
    pub median_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Everything the result files yielded for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub aggregate: AggregateRecord,
    pub endpoints: Vec<EndpointRecord>,
    pub history: Vec<HistoryPoint>,
}

/// Parse the engine's result files from `dir` with the given prefix.
///
/// Both files are optional and a malformed field never aborts the parse; the
/// result is `None` only when no aggregate row was found at all, which the
/// caller treats as "no data" rather than an empty record.
pub fn parse_stats(dir: &Path, prefix: &str) -> Option<StatsReport> {
    let stats_path = dir.join(results::stats_file_name(prefix));
    let history_path = dir.join(results::history_file_name(prefix));

    let mut aggregate = None;
    let mut endpoints = Vec::new();

    match read_rows(&stats_path) {
        Ok(rows) => {
            for row in rows {
                if field(&row, columns::NAME) == Some(results::AGGREGATE_NAME) {
                    aggregate = Some(aggregate_from_row(&row));
                } else {
                    endpoints.push(endpoint_from_row(&row));
                }
            }
        }
        Err(err) => log::warn!("Stats file {} unreadable: {err}", stats_path.display()),
    }

    let mut history = Vec::new();
    match read_rows(&history_path) {
        Ok(rows) => {
            for row in rows {
                if field(&row, columns::NAME) == Some(results::AGGREGATE_NAME) {
                    history.push(history_from_row(&row));
                }
            }
        }
        Err(err) => log::warn!(
            "History file {} unreadable: {err}",
            history_path.display()
        ),
    }

    let aggregate = match aggregate {
        Some(aggregate) => aggregate,
        None => {
            log::warn!("No aggregate row found in result files, treating run as having no data");
            return None;
        }
    };

    Some(StatsReport {
        aggregate,
        endpoints,
        history,
    })
}

fn aggregate_from_row(row: &Row) -> AggregateRecord {
    let requests = coerce_int(field(row, columns::REQUEST_COUNT));
    let failures = coerce_int(field(row, columns::FAILURE_COUNT));

    AggregateRecord {
        requests,
        failures,
        failure_rate_pct: failure_rate_pct(requests, failures),
        median_ms: coerce_float(field(row, columns::MEDIAN)),
        p95_ms: coerce_float(field(row, columns::P95)),
        max_ms: coerce_float(field(row, columns::MAX)),
        avg_ms: coerce_float(field(row, columns::AVERAGE)),
        rps: coerce_float(field(row, columns::RPS)),
    }
}

fn endpoint_from_row(row: &Row) -> EndpointRecord {
    EndpointRecord {
        name: field(row, columns::NAME).unwrap_or_default().to_string(),
        method: field(row, columns::TYPE).unwrap_or("GET").to_string(),
        requests: coerce_int(field(row, columns::REQUEST_COUNT)),
        failures: coerce_int(field(row, columns::FAILURE_COUNT)),
        median_ms: coerce_float(field(row, columns::MEDIAN)),
        p95_ms: coerce_float(field(row, columns::P95)),
        max_ms: coerce_float(field(row, columns::MAX)),
        rps: coerce_float(field(row, columns::RPS)),
    }
}

fn history_from_row(row: &Row) -> HistoryPoint {
    HistoryPoint {
        timestamp: coerce_int(field(row, columns::TIMESTAMP)) as i64,
        users: coerce_int(field(row, columns::USER_COUNT)),
        rps: coerce_float(field(row, columns::RPS)),
        failures_per_sec: coerce_float(field(row, columns::FAILURES_PER_SEC)),
        median_ms: coerce_float(field(row, columns::MEDIAN)),
        p95_ms: coerce_float(field(row, columns::P95)),
        p99_ms: coerce_float(field(row, columns::P99)),
    }
}

fn failure_rate_pct(requests: u64, failures: u64) -> f64 {
    if requests == 0 {
        return 0.0;
    }
    (failures as f64 / requests as f64 * 100.0 * 100.0).round() / 100.0
}

type Row = HashMap<String, String>;

fn field<'a>(row: &'a Row, name: &str) -> Option<&'a str> {
    row.get(name).map(String::as_str)
}

/// Integer coercion: blank and `N/A` become the default, decimal-formatted
/// integers are truncated, anything unparsable falls back silently.
fn coerce_int(value: Option<&str>) -> u64 {
    coerce_float(value) as u64
}

fn coerce_float(value: Option<&str>) -> f64 {
    let value = value.unwrap_or_default().trim();
    if value.is_empty() || value.eq_ignore_ascii_case("n/a") {
        return 0.0;
    }
    value.parse::<f64>().unwrap_or(0.0)
}

/// Read a header-mapped CSV file: one map per data row, keyed by column name.
fn read_rows(path: &Path) -> std::io::Result<Vec<Row>> {
    if !path.exists() {
        log::warn!("Result file missing: {}", path.display());
        return Ok(Vec::new());
    }

    let mut lines = BufReader::new(File::open(path)?).lines();
    let header = match lines.next() {
        Some(header) => split_record(&header?),
        None => return Ok(Vec::new()),
    };

    let mut rows = Vec::new();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let values = split_record(&line);
        rows.push(
            header
                .iter()
                .cloned()
                .zip(values.into_iter().chain(std::iter::repeat(String::new())))
                .collect(),
        );
    }
    Ok(rows)
}

/// Split one CSV record, honouring quoted fields and doubled quotes.
fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    fields.push(current);
    fields
}
