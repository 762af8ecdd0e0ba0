use siteload_core::protocol;

use crate::state::ScanStatus;

/// Watches the child's output for the crawl -> load-test transition.
///
/// A run starts in `Crawling`; the first line carrying one of the protocol's
/// crawl-finished markers flips the latch and yields a single `Running`
/// transition. Later marker lines are ignored and there is no way back.
#[derive(Debug, Default)]
pub struct TransitionDetector {
    crawl_done: bool,
}

impl TransitionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, line: &str) -> Option<ScanStatus> {
        if self.crawl_done || !protocol::is_crawl_done_marker(line) {
            return None;
        }
        self.crawl_done = true;
        log::info!("Transition detected: crawl finished, load test starting");
        Some(ScanStatus::Running)
    }
}
