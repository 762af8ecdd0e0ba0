use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use url::Url;

use siteload_core::prelude::ShutdownListener;

use crate::stats::StatsRegistry;

/// Outcome of one simulated request, as the black-box classifier sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success,
    Failure(String),
}

impl Classification {
    pub fn is_failure(&self) -> bool {
        matches!(self, Classification::Failure(_))
    }
}

/// Classify a response status with no knowledge of the site.
///
/// Success on 2xx and on every redirect; the handful of statuses that clearly
/// indicate the site is struggling are named failures; everything else is
/// accepted.
pub fn classify(status: u16) -> Classification {
    match status {
        200..=299 => Classification::Success,
        300..=399 => Classification::Success,
        404 => Classification::Failure("404 Not Found".to_string()),
        429 => Classification::Failure("rate limited (429)".to_string()),
        503 => Classification::Failure("service unavailable (503)".to_string()),
        code @ 500..=599 => Classification::Failure(format!("server error ({code})")),
        _ => Classification::Success,
    }
}

/// Everything one simulated user needs to run its iteration loop.
pub struct UserContext {
    pub base: Url,
    pub paths: Arc<Vec<String>>,
    pub registry: Arc<StatsRegistry>,
    pub client: reqwest::blocking::Client,
    pub wait_min: Duration,
    pub wait_max: Duration,
    pub shutdown: ShutdownListener,
}

/// The iteration loop of one simulated user.
///
/// Pick a discovered path at random, think for a bit, GET it, classify the
/// response, record the outcome. Runs until the shutdown signal.
pub fn run_user(mut ctx: UserContext) {
    let mut rng = rand::thread_rng();

    loop {
        if ctx.shutdown.should_shutdown() {
            break;
        }

        let path = ctx
            .paths
            .choose(&mut rng)
            .map(String::as_str)
            .unwrap_or("/");

        let think = think_time(&mut rng, ctx.wait_min, ctx.wait_max);
        std::thread::sleep(think);
        if ctx.shutdown.should_shutdown() {
            break;
        }

        let target = match ctx.base.join(path) {
            Ok(target) => target,
            Err(err) => {
                log::warn!("Skipping unjoinable path {path}: {err}");
                continue;
            }
        };

        let name = format!("[GET] {path}");
        let started = Instant::now();
        let outcome = match ctx.client.get(target).send() {
            Ok(response) => classify(response.status().as_u16()),
            Err(err) => Classification::Failure(format!("request error: {err}")),
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        if let Classification::Failure(reason) = &outcome {
            log::debug!("{name} failed: {reason}");
        }
        ctx.registry
            .record(&name, "GET", latency_ms, outcome.is_failure());
    }
}

fn think_time(rng: &mut impl Rng, min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span = (max - min).as_secs_f64();
    min + Duration::from_secs_f64(rng.gen_range(0.0..=span))
}
