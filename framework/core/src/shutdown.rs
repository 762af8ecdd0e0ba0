use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::{Receiver, Sender};

/// Broadcast handle used to stop a run and everything spawned for it.
///
/// Cloning the handle is cheap. Each thread or task that needs to react to a
/// stop request should be given its own listener via [`ShutdownHandle::new_listener`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Sender<()>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: tokio::sync::broadcast::channel(1).0,
        }
    }

    pub fn shutdown(&self) {
        if self.sender.send(()).is_err() {
            // Nobody is listening, which happens when shutdown is signalled twice
            // or after all workers have already exited.
            log::debug!("Shutdown signalled with no listeners");
        }
    }

    pub fn new_listener(&self) -> ShutdownListener {
        ShutdownListener {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Per-worker view of the shutdown signal.
///
/// Not shared between threads; every worker owns its listener.
#[derive(Debug)]
pub struct ShutdownListener {
    receiver: Receiver<()>,
}

impl ShutdownListener {
    /// Point in time check. Once this returns true it keeps returning true.
    pub fn should_shutdown(&mut self) -> bool {
        match self.receiver.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Closed) => true,
            Err(TryRecvError::Lagged(_)) => true,
            Err(TryRecvError::Empty) => false,
        }
    }

    /// Wait for the shutdown signal. Safe to race against other futures.
    pub async fn wait_for_shutdown(&mut self) {
        // A closed channel means the handle is gone, which is as good as a signal.
        let _ = self.receiver.recv().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_sees_signal_once_sent() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();

        assert!(!listener.should_shutdown());
        handle.shutdown();
        assert!(listener.should_shutdown());
        // The signal latches.
        assert!(listener.should_shutdown());
    }

    #[test]
    fn listener_created_before_signal_is_required() {
        let handle = ShutdownHandle::new();
        handle.shutdown();

        // A listener subscribed after the signal was sent sees nothing, so a
        // run must hand out listeners before it starts signalling.
        let mut late = handle.new_listener();
        assert!(!late.should_shutdown());
    }

    #[test]
    fn dropping_the_handle_releases_listeners() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();
        drop(handle);
        assert!(listener.should_shutdown());
    }
}
