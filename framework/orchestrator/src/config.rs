use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use siteload_core::stage::{default_stages, Stage};

/// Every behaviour-governing constant of a run.
///
/// Nothing in the supervisor or the engine invocation is hardcoded; tests
/// shrink the watchdog ceiling or swap the stage table through this struct.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Hard ceiling on the whole run, independent of the stage table. The
    /// watchdog kills the child when this is reached.
    pub watchdog_ceiling_secs: u64,

    /// How many link hops the crawler follows from the base page.
    pub crawl_depth: usize,
    /// Maximum number of URLs the crawler may discover.
    pub crawl_max_urls: usize,
    /// Per-request crawl timeout, in seconds.
    pub crawl_timeout_secs: u64,

    /// The staged concurrency profile.
    pub stages: Vec<Stage>,

    /// Think-time bounds of a simulated user, in seconds.
    pub wait_min_secs: f64,
    pub wait_max_secs: f64,

    /// Where the engine writes its result files.
    pub csv_dir: PathBuf,
    /// Result file prefix, e.g. `rapport` -> `rapport_stats.csv`.
    pub csv_prefix: String,

    /// Explicit engine binary path. When unset the binary is resolved through
    /// the `SITELOAD_ENGINE_PATH` environment variable or the system PATH.
    pub engine_path: Option<PathBuf>,

    /// How long the worker thread waits for one event delivery to complete.
    pub bridge_timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        // Ceiling = crawl allowance + full stage table + margin.
        Self {
            watchdog_ceiling_secs: 360,
            crawl_depth: 2,
            crawl_max_urls: 30,
            crawl_timeout_secs: 10,
            stages: default_stages(),
            wait_min_secs: 1.0,
            wait_max_secs: 3.0,
            csv_dir: PathBuf::from("."),
            csv_prefix: "rapport".to_string(),
            engine_path: None,
            bridge_timeout_secs: 5,
        }
    }
}

impl ScanConfig {
    pub fn watchdog_ceiling(&self) -> Duration {
        Duration::from_secs(self.watchdog_ceiling_secs)
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge_timeout_secs)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}
