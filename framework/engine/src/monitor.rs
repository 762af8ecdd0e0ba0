use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use siteload_core::prelude::ShutdownListener;

/// Watch the engine's own CPU usage and warn when the generator is saturating
/// the host.
///
/// A saturated generator queues requests before they reach the network, which
/// inflates every latency number in the run. This never stops the test, it
/// only tells the user the numbers may be skewed.
pub(crate) fn start_monitor(mut shutdown_listener: ShutdownListener) {
    std::thread::Builder::new()
        .name("monitor".to_string())
        .spawn(move || {
            let this_process_pid = Pid::from_u32(std::process::id());
            let cpu_count = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            let mut sys = System::new();

            loop {
                if shutdown_listener.should_shutdown() {
                    break;
                }

                sys.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[this_process_pid]),
                    true,
                    ProcessRefreshKind::nothing().with_cpu(),
                );

                if let Some(process) = sys.process(this_process_pid) {
                    let usage = process.cpu_usage() / cpu_count as f32;
                    if usage > 75.0 {
                        log::warn!(
                            "Load generator is using {usage:.1}% of {cpu_count} cores; latency numbers may be skewed"
                        );
                    }
                }

                std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL.max(
                    std::time::Duration::from_secs(1),
                ));
            }
        })
        .expect("Failed to start monitor thread");
}
