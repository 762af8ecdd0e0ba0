use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::report::StatsReport;

/// Lifecycle of a scan run.
///
/// Transitions are monotonic within a run: `Idle -> Crawling -> Running ->
/// {Done, Error}`, with `Running` optionally skipped when the child exits
/// before the crawl-finished marker is seen. A new run resets a terminal
/// state back to `Crawling`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    #[display("idle")]
    Idle,
    #[display("crawling")]
    Crawling,
    #[display("running")]
    Running,
    #[display("done")]
    Done,
    #[display("error")]
    Error,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanStatus::Done | ScanStatus::Error)
    }

    fn rank(self) -> u8 {
        match self {
            ScanStatus::Idle => 0,
            ScanStatus::Crawling => 1,
            ScanStatus::Running => 2,
            ScanStatus::Done | ScanStatus::Error => 3,
        }
    }

    /// May a run move from `self` to `next` without going backwards?
    pub fn can_advance_to(self, next: ScanStatus) -> bool {
        next.rank() > self.rank()
    }
}

/// Everything observers may know about the current (or last) run.
#[derive(Debug)]
pub struct ScanState {
    status: ScanStatus,
    domain: String,
    logs: Vec<String>,
    discovered: Vec<String>,
    stats: Option<StatsReport>,
}

impl ScanState {
    fn new() -> Self {
        Self {
            status: ScanStatus::Idle,
            domain: String::new(),
            logs: Vec::new(),
            discovered: Vec::new(),
            stats: None,
        }
    }
}

/// Owned context object around the process-wide scan state.
///
/// Write discipline: during a run only the supervisor's worker thread mutates
/// the domain fields; the broadcaster reads snapshots but never writes.
/// External callers read between runs.
#[derive(Debug, Clone)]
pub struct ScanContext {
    state: Arc<RwLock<ScanState>>,
}

impl Default for ScanContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanContext {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(ScanState::new())),
        }
    }

    /// Atomically claim the context for a new run.
    ///
    /// Succeeds only from `Idle` or a terminal state; a non-terminal status
    /// means a run is active and the request must be rejected upstream.
    /// On success the per-run fields are reset and the status is `Crawling`.
    pub fn try_begin(&self, domain: &str) -> bool {
        let mut state = self.state.write();
        if !matches!(state.status, ScanStatus::Idle) && !state.status.is_terminal() {
            return false;
        }

        state.status = ScanStatus::Crawling;
        state.domain = domain.to_string();
        state.logs.clear();
        state.discovered.clear();
        state.stats = None;
        true
    }

    /// Advance the run status, refusing backward transitions.
    pub fn advance_status(&self, next: ScanStatus) -> bool {
        let mut state = self.state.write();
        if !state.status.can_advance_to(next) {
            log::warn!(
                "Refusing status transition {} -> {}",
                state.status,
                next
            );
            return false;
        }
        state.status = next;
        true
    }

    pub fn status(&self) -> ScanStatus {
        self.state.read().status
    }

    pub fn domain(&self) -> String {
        self.state.read().domain.clone()
    }

    /// Append one line to the run's log buffer and return its index.
    pub fn push_log(&self, line: String) -> usize {
        let mut state = self.state.write();
        state.logs.push(line);
        state.logs.len() - 1
    }

    /// Record a URL reported through the side channel, ignoring repeats.
    pub fn add_discovered(&self, url: &str) {
        let mut state = self.state.write();
        if !state.discovered.iter().any(|known| known == url) {
            state.discovered.push(url.to_string());
        }
    }

    pub fn discovered(&self) -> Vec<String> {
        self.state.read().discovered.clone()
    }

    pub fn set_stats(&self, stats: Option<StatsReport>) {
        self.state.write().stats = stats;
    }

    pub fn stats(&self) -> Option<StatsReport> {
        self.state.read().stats.clone()
    }

    /// Current status plus the full log buffer, for a joining subscriber.
    pub fn snapshot(&self) -> (ScanStatus, Vec<String>) {
        let state = self.state.read();
        (state.status, state.logs.clone())
    }
}
