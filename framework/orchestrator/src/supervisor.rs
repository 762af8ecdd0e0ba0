use std::env;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{bail, Context};
use parking_lot::Mutex;

use siteload_core::protocol;

use crate::broadcast::EventBridge;
use crate::broadcast::EventBus;
use crate::config::ScanConfig;
use crate::detector::TransitionDetector;
use crate::persist::{ScanRecord, ScanStore};
use crate::report::parse_stats;
use crate::state::{ScanContext, ScanStatus};

/// Environment variable to override the path to the load-engine binary.
pub const ENGINE_PATH_ENV: &str = "SITELOAD_ENGINE_PATH";

/// Default binary name, looked up in the user's PATH.
pub const ENGINE_BINARY: &str = "siteload-engine";

/// Resolve the load-engine binary.
///
/// If [`ENGINE_PATH_ENV`] is set, its value is used as the path to the
/// binary. If it is not set, the binary is looked up in the system's PATH.
pub fn engine_path() -> anyhow::Result<PathBuf> {
    match env::var(ENGINE_PATH_ENV).ok().as_deref() {
        Some("") => {
            bail!("'{ENGINE_PATH_ENV}' set to empty string");
        }
        Some("siteload-engine") | None => which::which(ENGINE_BINARY).with_context(|| {
            format!(
                "Load engine binary not found in PATH. Install it or set '{ENGINE_PATH_ENV}' to the correct path."
            )
        }),
        Some(path) => {
            let engine_path = PathBuf::from(path);
            if !engine_path.exists() {
                bail!(
                    "Path to the load engine overridden with '{ENGINE_PATH_ENV}={path}' but that path doesn't exist",
                    path = engine_path.display()
                );
            }
            Ok(engine_path)
        }
    }
}

/// Shared handle to the child process, cleared on every exit path.
///
/// The watchdog and external stop requests only ever `kill` through it; the
/// worker thread is the only taker.
#[derive(Clone, Default)]
pub struct ProcessSlot {
    inner: Arc<Mutex<Option<Child>>>,
}

impl ProcessSlot {
    fn put(&self, child: Child) {
        *self.inner.lock() = Some(child);
    }

    fn take(&self) -> Option<Child> {
        self.inner.lock().take()
    }

    /// Forcibly terminate the child if one is running.
    pub fn kill(&self) {
        if let Some(child) = self.inner.lock().as_mut() {
            log::warn!("Forcibly terminating the load engine (PID {})", child.id());
            let _ = child.kill();
        }
    }

    /// Kill and reap whatever is still in the slot.
    fn clear(&self) {
        if let Some(mut child) = self.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Kills, reaps and drops the process handle no matter how the worker exits.
struct SlotGuard(ProcessSlot);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.clear();
    }
}

/// Hard run-duration ceiling, independent of the stage table.
///
/// Armed once per run on its own timer thread; its only side effect is
/// forcible termination of the child. It is cancelled exactly once, by drop,
/// on whichever exit path the worker takes first.
struct Watchdog {
    cancel_tx: std::sync::mpsc::SyncSender<()>,
}

impl Watchdog {
    fn arm(slot: ProcessSlot, ceiling: Duration) -> Self {
        let (cancel_tx, cancel_rx) = std::sync::mpsc::sync_channel(1);

        std::thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                if cancel_rx.recv_timeout(ceiling).is_err() {
                    log::warn!(
                        "[WATCHDOG] Duree max atteinte ({}s), arret force du moteur",
                        ceiling.as_secs()
                    );
                    slot.kill();
                }
            })
            .expect("Failed to start watchdog thread");

        Self { cancel_tx }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        let _ = self.cancel_tx.try_send(());
    }
}

/// Orchestrates load-test runs against a single target site.
///
/// Exactly one run may be active at a time; starting a second one while the
/// first is non-terminal is rejected. The scanner owns the scan state, the
/// event bus serving subscribers, and the child-process handle for the
/// duration of a run.
pub struct Scanner {
    ctx: ScanContext,
    bus: EventBus,
    config: ScanConfig,
    store: Option<Arc<dyn ScanStore>>,
    slot: ProcessSlot,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scanner {
    pub fn new(config: ScanConfig, store: Option<Arc<dyn ScanStore>>) -> Self {
        let ctx = ScanContext::new();
        let bus = EventBus::start(ctx.clone());
        Self {
            ctx,
            bus,
            config,
            store,
            slot: ProcessSlot::default(),
            worker: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &ScanContext {
        &self.ctx
    }

    /// Register a live observer of status and log events.
    pub async fn subscribe(
        &self,
    ) -> anyhow::Result<tokio::sync::mpsc::UnboundedReceiver<crate::broadcast::Event>> {
        self.bus.subscribe().await
    }

    /// Start a run against `domain`, owned by `owner` if given.
    ///
    /// Rejects the request when a run is already active.
    pub fn start(&self, domain: &str, owner: Option<&str>) -> anyhow::Result<()> {
        if !self.ctx.try_begin(domain) {
            bail!("a scan is already active ({})", self.ctx.status());
        }

        let args = RunArgs {
            ctx: self.ctx.clone(),
            bridge: self.bus.bridge(self.config.bridge_timeout()),
            config: self.config.clone(),
            domain: domain.to_string(),
            owner: owner.map(str::to_string),
            store: self.store.clone(),
            slot: self.slot.clone(),
        };

        let handle = std::thread::Builder::new()
            .name("scan-worker".to_string())
            .spawn(move || run_worker(args))
            .context("Failed to spawn the scan worker thread")?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Coarse cancellation: forcibly terminate the child process. The run
    /// then finishes through its normal exit path.
    pub fn stop(&self) {
        self.slot.kill();
    }

    /// Wait for the current run's worker thread to finish.
    pub fn join(&self) {
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                log::error!("Scan worker thread panicked");
            }
        }
    }
}

struct RunArgs {
    ctx: ScanContext,
    bridge: EventBridge,
    config: ScanConfig,
    domain: String,
    owner: Option<String>,
    store: Option<Arc<dyn ScanStore>>,
    slot: ProcessSlot,
}

fn run_worker(args: RunArgs) {
    let run_id = nanoid::nanoid!();
    // Dropped last: whatever happens below, no process handle survives the run.
    let _slot_guard = SlotGuard(args.slot.clone());

    if let Err(err) = drive_run(&args, &run_id) {
        log::error!("Run {run_id} failed: {err:?}");
        emit_log(&args, format!("[ERREUR] {err:#}"));
        emit_status(&args, ScanStatus::Error);
    }
}

fn drive_run(args: &RunArgs, run_id: &str) -> anyhow::Result<()> {
    let config = &args.config;

    // New run: the dispatcher restarts its per-subscriber delivery cursors.
    if let Err(err) = args.bridge.reset() {
        log::warn!("Event bus reset incomplete: {err}");
    }
    // The context is already `Crawling` (set when the run was claimed);
    // subscribers still need the event.
    if let Err(err) = args.bridge.send_status(ScanStatus::Crawling) {
        log::warn!("Status delivery incomplete: {err}");
    }
    emit_log(args, format!("[DÉMARRAGE] Cible : {}", args.domain));

    let engine = match &config.engine_path {
        Some(path) => path.clone(),
        None => engine_path()?,
    };

    let mut cmd = Command::new(&engine);
    cmd.arg("--host")
        .arg(&args.domain)
        .arg("--csv")
        .arg(&config.csv_prefix)
        .arg("--csv-dir")
        .arg(&config.csv_dir)
        .arg("--depth")
        .arg(config.crawl_depth.to_string())
        .arg("--max-urls")
        .arg(config.crawl_max_urls.to_string())
        .arg("--crawl-timeout")
        .arg(config.crawl_timeout_secs.to_string())
        .arg("--wait-min")
        .arg(config.wait_min_secs.to_string())
        .arg("--wait-max")
        .arg(config.wait_max_secs.to_string())
        .arg("--no-progress");
    for stage in &config.stages {
        cmd.arg("--stage").arg(stage.flag_value());
    }
    emit_log(args, format!("[CMD] {}", render_command(&cmd)));

    // One pipe carries both of the child's streams, so the parent reads the
    // exact line order the child produced.
    let (reader, writer) = std::io::pipe().context("Failed to create the output pipe")?;
    cmd.stdout(
        writer
            .try_clone()
            .context("Failed to clone the output pipe")?,
    );
    cmd.stderr(writer);
    cmd.stdin(Stdio::null());

    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn the load engine {}", engine.display()))?;
    // The Command still holds writer clones; they must close for EOF to occur.
    drop(cmd);

    log::info!("Run {run_id}: engine started with PID {}", child.id());
    args.slot.put(child);

    let _watchdog = Watchdog::arm(args.slot.clone(), config.watchdog_ceiling());

    let mut detector = TransitionDetector::new();
    for line in std::io::BufReader::new(reader).lines() {
        let line = line.context("Failed to read the engine's output")?;
        if line.trim().is_empty() {
            continue;
        }

        // The side channel: the crawler echoes each discovered URL on its
        // own line, the engine's only way to report them mid-run.
        if let Some(url) = protocol::parse_discovered_line(&line) {
            args.ctx.add_discovered(url);
        }

        if let Some(next) = detector.observe(&line) {
            emit_status(args, next);
        }

        emit_log(args, line);
    }

    let status = match args.slot.take() {
        Some(mut child) => child.wait().context("Failed to reap the engine process")?,
        None => bail!("the engine process handle disappeared mid-run"),
    };
    let exit_code = status.code().unwrap_or(-1);
    log::info!("Run {run_id}: engine exited with code {exit_code}");

    let report = parse_stats(&config.csv_dir, &config.csv_prefix);
    args.ctx.set_stats(report.clone());

    if exit_code != 0 && report.is_none() {
        emit_log(
            args,
            format!("[ERREUR] Le moteur s'est arrete de maniere inattendue avec le code {exit_code}"),
        );
        emit_status(args, ScanStatus::Error);
        return Ok(());
    }

    emit_status(args, ScanStatus::Done);
    emit_log(args, "[TERMINÉ] Test de charge terminé.".to_string());

    if let Some(report) = report {
        let aggregate = &report.aggregate;
        emit_log(
            args,
            format!(
                "[RÉSULTAT] {} requêtes | Erreurs: {}% | RPS: {:.1} | P95: {:.1}ms",
                aggregate.requests, aggregate.failure_rate_pct, aggregate.rps, aggregate.p95_ms
            ),
        );

        // Offered only after the terminal status went out: storage can
        // neither delay nor change the outcome subscribers saw.
        if let (Some(store), Some(owner)) = (&args.store, &args.owner) {
            let record = ScanRecord::new(
                run_id.to_string(),
                args.domain.clone(),
                owner.clone(),
                report.aggregate.clone(),
                chrono::Utc::now(),
            );
            match store.persist(&record) {
                Ok(()) => log::info!("Scan record persisted for owner {owner}"),
                Err(err) => log::warn!("Persisting the scan record failed (ignored): {err:?}"),
            }
        }
    }

    Ok(())
}

fn emit_log(args: &RunArgs, line: String) {
    let index = args.ctx.push_log(line.clone());
    if let Err(err) = args.bridge.send_log(line, index) {
        log::warn!("Log delivery incomplete: {err}");
    }
}

fn emit_status(args: &RunArgs, status: ScanStatus) {
    if !args.ctx.advance_status(status) {
        return;
    }
    if let Err(err) = args.bridge.send_status(status) {
        log::warn!("Status delivery incomplete: {err}");
    }
}

fn render_command(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|arg| arg.to_string_lossy().into_owned()));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both tests touch the same environment variable.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn engine_path_env_override_must_exist() {
        let _guard = ENV_LOCK.lock();
        env::set_var(ENGINE_PATH_ENV, "/non/existent/path/to/siteload-engine");
        let result = engine_path();
        env::remove_var(ENGINE_PATH_ENV);
        assert!(result.is_err());
    }

    #[test]
    fn engine_path_env_override_is_used_when_it_exists() {
        let _guard = ENV_LOCK.lock();
        let temp = tempfile::NamedTempFile::new().expect("failed to create temp file");
        let test_path = temp.path().to_str().expect("failed to get temp file path");
        env::set_var(ENGINE_PATH_ENV, test_path);
        let result = engine_path().expect("failed to resolve engine path");
        env::remove_var(ENGINE_PATH_ENV);
        assert_eq!(result, PathBuf::from(test_path));
    }

    #[test]
    fn rendered_command_lists_program_and_flags() {
        let mut cmd = Command::new("siteload-engine");
        cmd.arg("--host").arg("https://example.com");
        assert_eq!(
            render_command(&cmd),
            "siteload-engine --host https://example.com"
        );
    }
}
