use std::time::Duration;

use tokio::sync::mpsc;

use crate::state::{ScanContext, ScanStatus};

/// One status or log event, as subscribers see it.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Status(ScanStatus),
    Log(String),
}

/// Why a bridged send did not complete.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("event dispatcher is gone")]
    Closed,
    #[error("event delivery timed out after {0:?}")]
    Timeout(Duration),
}

enum Command {
    /// Register a subscriber. It first receives the current status and the
    /// full accumulated log buffer, then live events.
    Subscribe {
        sender: mpsc::UnboundedSender<Event>,
        registered: tokio::sync::oneshot::Sender<()>,
    },
    /// A new run started: per-subscriber delivery cursors start over.
    Reset {
        ack: std::sync::mpsc::SyncSender<()>,
    },
    EmitStatus {
        status: ScanStatus,
        ack: std::sync::mpsc::SyncSender<()>,
    },
    EmitLog {
        line: String,
        /// Index of the line in the run's log buffer, used to avoid
        /// re-delivering lines a subscriber already got in its join snapshot.
        index: usize,
        ack: std::sync::mpsc::SyncSender<()>,
    },
}

/// Fan-out hub bridging the supervisor's worker thread into a single-threaded
/// cooperative dispatch context.
///
/// All subscriber delivery happens on the dispatch task; the worker thread
/// only ever hands events over through a bounded channel and blocks, with a
/// timeout, until the delivery pass completed. One slow delivery therefore
/// stalls ingestion of further output, which is the accepted price for every
/// subscriber observing the exact same event sequence.
pub struct EventBus {
    cmd_tx: mpsc::Sender<Command>,
}

/// Command channel depth between the worker and the dispatcher. The worker
/// waits for an ack per event, so this only needs room for subscribe traffic.
const COMMAND_CAPACITY: usize = 64;

impl EventBus {
    /// Start the dispatcher on its own dedicated single-threaded runtime.
    pub fn start(ctx: ScanContext) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);

        std::thread::Builder::new()
            .name("dispatch".to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("Failed to create dispatch runtime");
                runtime.block_on(dispatch_loop(ctx, cmd_rx));
            })
            .expect("Failed to start dispatch thread");

        Self { cmd_tx }
    }

    /// Producer-side handle for the supervisor's worker thread.
    pub fn bridge(&self, timeout: Duration) -> EventBridge {
        EventBridge {
            cmd_tx: self.cmd_tx.clone(),
            timeout,
        }
    }

    /// Register a new subscriber.
    ///
    /// The returned channel first yields the join snapshot (current status,
    /// then every buffered log line), followed by live events in production
    /// order.
    pub async fn subscribe(&self) -> anyhow::Result<mpsc::UnboundedReceiver<Event>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (registered, confirmation) = tokio::sync::oneshot::channel();
        self.cmd_tx
            .send(Command::Subscribe { sender, registered })
            .await
            .map_err(|_| anyhow::anyhow!("event dispatcher is gone"))?;
        // Wait until the dispatcher has taken the join snapshot, so events
        // produced after this call are guaranteed to be delivered live.
        confirmation
            .await
            .map_err(|_| anyhow::anyhow!("event dispatcher is gone"))?;
        Ok(receiver)
    }
}

/// The worker thread's side of the handoff.
///
/// Every send blocks until the dispatcher finished the delivery pass or the
/// timeout elapsed. Errors are reported, not fatal: a stalled subscriber must
/// not bring down the run.
#[derive(Clone)]
pub struct EventBridge {
    cmd_tx: mpsc::Sender<Command>,
    timeout: Duration,
}

impl EventBridge {
    /// Tell the dispatcher a new run began and log buffers were reset.
    pub fn reset(&self) -> Result<(), BridgeError> {
        self.send(|ack| Command::Reset { ack })
    }

    pub fn send_status(&self, status: ScanStatus) -> Result<(), BridgeError> {
        self.send(|ack| Command::EmitStatus { status, ack })
    }

    pub fn send_log(&self, line: String, index: usize) -> Result<(), BridgeError> {
        self.send(move |ack| Command::EmitLog { line, index, ack })
    }

    fn send(
        &self,
        make: impl FnOnce(std::sync::mpsc::SyncSender<()>) -> Command,
    ) -> Result<(), BridgeError> {
        let (ack_tx, ack_rx) = std::sync::mpsc::sync_channel(1);
        self.cmd_tx
            .blocking_send(make(ack_tx))
            .map_err(|_| BridgeError::Closed)?;
        ack_rx
            .recv_timeout(self.timeout)
            .map_err(|_| BridgeError::Timeout(self.timeout))
    }
}

struct Subscriber {
    sender: mpsc::UnboundedSender<Event>,
    /// Log buffer index of the next line this subscriber has not seen.
    next_log_index: usize,
    /// Last status delivered, so a status already included in the join
    /// snapshot is not delivered twice.
    last_status: Option<ScanStatus>,
    dead: bool,
}

async fn dispatch_loop(ctx: ScanContext, mut cmd_rx: mpsc::Receiver<Command>) {
    let mut subscribers: Vec<Subscriber> = Vec::new();

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Command::Subscribe { sender, registered } => {
                let (status, logs) = ctx.snapshot();
                let mut subscriber = Subscriber {
                    sender,
                    next_log_index: logs.len(),
                    last_status: Some(status),
                    dead: false,
                };

                let mut alive = subscriber.sender.send(Event::Status(status)).is_ok();
                if alive {
                    for line in logs {
                        if subscriber.sender.send(Event::Log(line)).is_err() {
                            alive = false;
                            break;
                        }
                    }
                }
                if alive {
                    subscribers.push(subscriber);
                }
                let _ = registered.send(());
            }
            Command::Reset { ack } => {
                for subscriber in subscribers.iter_mut() {
                    subscriber.next_log_index = 0;
                    // A fresh run may legitimately revisit a status the
                    // subscriber already saw (terminal -> crawling).
                    subscriber.last_status = None;
                }
                let _ = ack.send(());
            }
            Command::EmitStatus { status, ack } => {
                for subscriber in subscribers.iter_mut() {
                    if subscriber.last_status == Some(status) {
                        continue;
                    }
                    if subscriber.sender.send(Event::Status(status)).is_err() {
                        subscriber.dead = true;
                        continue;
                    }
                    subscriber.last_status = Some(status);
                }
                prune(&mut subscribers);
                let _ = ack.send(());
            }
            Command::EmitLog { line, index, ack } => {
                for subscriber in subscribers.iter_mut() {
                    // Already covered by this subscriber's join snapshot.
                    if index < subscriber.next_log_index {
                        continue;
                    }
                    if subscriber.sender.send(Event::Log(line.clone())).is_err() {
                        subscriber.dead = true;
                        continue;
                    }
                    subscriber.next_log_index = index + 1;
                }
                prune(&mut subscribers);
                let _ = ack.send(());
            }
        }
    }
}

/// Dead subscribers are dropped after the fan-out pass, never mid-iteration.
fn prune(subscribers: &mut Vec<Subscriber>) {
    let before = subscribers.len();
    subscribers.retain(|subscriber| !subscriber.dead);
    let removed = before - subscribers.len();
    if removed > 0 {
        log::info!(
            "Pruned {removed} dead subscriber(s), {} remaining",
            subscribers.len()
        );
    }
}
