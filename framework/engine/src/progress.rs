use std::cmp::min;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use siteload_core::prelude::ShutdownListener;

/// Displays a progress bar over the planned run time for standalone runs.
///
/// Suppressed with `--no-progress`; the supervisor always suppresses it so
/// the bar never pollutes the scraped output stream.
pub(crate) fn start_progress(planned: Duration, mut shutdown_listener: ShutdownListener) {
    std::thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || {
            let started = std::time::Instant::now();
            let pb = ProgressBar::new(planned.as_secs());
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{wide_bar:.cyan/blue}] {pos}s / {len}s",
                )
                .expect("Failed to set progress style")
                .progress_chars("#>-"),
            );

            loop {
                if shutdown_listener.should_shutdown() {
                    pb.finish_and_clear();
                    break;
                }

                pb.set_position(min(started.elapsed().as_secs(), planned.as_secs()));
                std::thread::sleep(Duration::from_secs(1));
            }
        })
        .expect("Failed to start progress thread");
}
