use std::cmp::min;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use url::Url;

use siteload_core::prelude::ShutdownHandle;
use siteload_core::results;
use siteload_core::stage::default_stages;

use crate::behaviour::{run_user, UserContext};
use crate::cli::EngineCli;
use crate::crawler::{CrawlOptions, Crawler};
use crate::monitor::start_monitor;
use crate::progress::start_progress;
use crate::shape::LoadShape;
use crate::stats::StatsRegistry;

const SCHEDULER_TICK: Duration = Duration::from_secs(1);

/// Run the whole engine sequence: crawl, staged load, result files, summary.
pub fn run(cli: EngineCli) -> anyhow::Result<()> {
    anyhow::ensure!(
        cli.wait_min <= cli.wait_max,
        "--wait-min must not exceed --wait-max"
    );
    let base = Url::parse(&cli.host)
        .with_context(|| format!("'{}' is not a valid base URL", cli.host))?;

    let stages = if cli.stage.is_empty() {
        default_stages()
    } else {
        cli.stage.clone()
    };
    let stage_count = stages.len();
    let mut shape = LoadShape::new(stages);
    let total_duration = shape.total_duration_secs();

    println!("\n{}", "=".repeat(56));
    println!("     LOAD TEST BLACK BOX — DEMARRAGE");
    println!("{}", "=".repeat(56));
    println!("  Cible         : {}", base);
    println!("  Duree estimee : {total_duration}s");
    println!("  Paliers       : {stage_count} niveaux");
    println!("{}", "=".repeat(56));

    let mut crawler = Crawler::new(
        cli.host.as_str(),
        CrawlOptions {
            max_depth: cli.depth,
            max_urls: cli.max_urls,
            timeout: Duration::from_secs(cli.crawl_timeout),
        },
    )?;
    let mut paths = crawler.crawl();

    if paths.is_empty() {
        println!("  AVERTISSEMENT : Aucune URL decouverte. Seule '/' sera testee.\n");
        paths = vec!["/".to_string()];
    }
    println!("  {} URL(s) utilisees pour le test de charge.\n", paths.len());

    run_load(&cli, base, paths, &mut shape, total_duration)?;

    Ok(())
}

fn run_load(
    cli: &EngineCli,
    base: Url,
    paths: Vec<String>,
    shape: &mut LoadShape,
    total_duration: u64,
) -> anyhow::Result<()> {
    let registry = Arc::new(StatsRegistry::new());
    let shutdown = ShutdownHandle::new();
    let paths = Arc::new(paths);
    let active_users = Arc::new(AtomicU32::new(0));

    let client = reqwest::blocking::Client::builder()
        .user_agent(crate::crawler::CRAWLER_USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build the HTTP client for simulated users")?;

    start_monitor(shutdown.new_listener());
    if !cli.no_progress {
        start_progress(Duration::from_secs(total_duration), shutdown.new_listener());
    }
    start_sampler(
        registry.clone(),
        active_users.clone(),
        shutdown.new_listener(),
    );

    let started = Instant::now();
    let mut workers = Vec::new();

    loop {
        let elapsed = started.elapsed().as_secs();
        let Some((target, ramp)) = shape.tick(elapsed) else {
            break;
        };

        let current = active_users.load(Ordering::Relaxed);
        if current < target {
            let to_spawn = min(ramp, target - current);
            for _ in 0..to_spawn {
                let index = active_users.fetch_add(1, Ordering::Relaxed);
                let ctx = UserContext {
                    base: base.clone(),
                    paths: paths.clone(),
                    registry: registry.clone(),
                    client: client.clone(),
                    wait_min: Duration::from_secs_f64(cli.wait_min),
                    wait_max: Duration::from_secs_f64(cli.wait_max),
                    shutdown: shutdown.new_listener(),
                };
                workers.push(
                    std::thread::Builder::new()
                        .name(format!("user-{index}"))
                        .spawn(move || run_user(ctx))
                        .context("Failed to spawn thread for simulated user")?,
                );
            }
            if active_users.load(Ordering::Relaxed) >= target {
                log::info!("All users spawned: {target} active");
            }
        }

        std::thread::sleep(SCHEDULER_TICK);
    }

    log::info!("Profile exhausted, stopping {} users", workers.len());
    shutdown.shutdown();
    for handle in workers {
        if handle.join().is_err() {
            log::error!("A simulated user panicked before shutdown");
        }
    }

    let stats_path = cli.csv_dir.join(results::stats_file_name(&cli.csv));
    let history_path = cli.csv_dir.join(results::history_file_name(&cli.csv));
    registry
        .write_stats_csv(&stats_path)
        .with_context(|| format!("Failed to write {}", stats_path.display()))?;
    registry
        .write_history_csv(&history_path)
        .with_context(|| format!("Failed to write {}", history_path.display()))?;

    print_summary(&registry);

    Ok(())
}

fn start_sampler(
    registry: Arc<StatsRegistry>,
    active_users: Arc<AtomicU32>,
    mut shutdown_listener: siteload_core::prelude::ShutdownListener,
) {
    std::thread::Builder::new()
        .name("sampler".to_string())
        .spawn(move || loop {
            if shutdown_listener.should_shutdown() {
                break;
            }
            std::thread::sleep(Duration::from_secs(1));
            registry.sample(active_users.load(Ordering::Relaxed), 1.0);
        })
        .expect("Failed to start sampler thread");
}

fn print_summary(registry: &StatsRegistry) {
    let totals = registry.totals();

    println!("\n{}", "=".repeat(56));
    println!("     TEST TERMINE — RESUME FINAL");
    println!("{}", "=".repeat(56));
    println!("  Requetes totales : {}", totals.requests);
    println!("  Echecs           : {}", totals.failures);
    println!("  Taux d'erreur    : {:.2}%", totals.failure_rate_pct);
    println!("  RPS moyen        : {:.1}", totals.rps);
    println!("  Latence mediane  : {} ms", totals.median_ms.unwrap_or(0));
    println!("  Latence P95      : {} ms", totals.p95_ms.unwrap_or(0));
    println!("  Latence max      : {} ms", totals.max_ms.unwrap_or(0));
    println!("{}\n", "=".repeat(56));

    if totals.requests > 0 {
        println!("{}", registry.summary_table());
    }
}
