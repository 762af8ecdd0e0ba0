use std::path::PathBuf;

use clap::Parser;

use siteload_core::stage::Stage;

#[derive(Parser)]
#[command(about, long_about = None)]
pub struct EngineCli {
    /// Base URL of the site under test
    #[clap(long)]
    pub host: String,

    /// Prefix for the result files written at the end of the run
    #[clap(long, default_value = "rapport")]
    pub csv: String,

    /// Directory the result files are written into
    #[clap(long, default_value = ".")]
    pub csv_dir: PathBuf,

    /// Override one stage of the load profile in the format
    /// `users:ramp:duration[:label]`, e.g. `--stage 50:10:30`. Repeat the flag
    /// for each stage; without it the default staircase is used.
    #[clap(long, value_parser = Stage::parse_flag)]
    pub stage: Vec<Stage>,

    /// How many link hops the crawler follows from the base page
    #[clap(long, default_value_t = 2)]
    pub depth: usize,

    /// Maximum number of URLs the crawler may discover
    #[clap(long, default_value_t = 30)]
    pub max_urls: usize,

    /// Per-request crawl timeout in seconds
    #[clap(long, default_value_t = 10)]
    pub crawl_timeout: u64,

    /// Minimum think time between two requests of one user, in seconds
    #[clap(long, default_value_t = 1.0)]
    pub wait_min: f64,

    /// Maximum think time between two requests of one user, in seconds
    #[clap(long, default_value_t = 3.0)]
    pub wait_max: f64,

    /// Do not show a progress bar. Recommended when the output is scraped or logged.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,
}
