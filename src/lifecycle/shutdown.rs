//! Shutdown coordination for the proxy.

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// The accept loop and any background task subscribe; one trigger reaches all of them.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Fire the shutdown signal. Returns how many subscribers were notified.
    pub fn trigger(&self) -> usize {
        self.tx.send(()).unwrap_or(0)
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
