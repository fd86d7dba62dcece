//! Connection identity and active-session tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count live sessions so shutdown can wait for them to drain
//!
//! # Design Decisions
//! - The count is an atomic; sessions never share any other state
//! - Draining waits on a `Notify` instead of polling

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct TrackerInner {
    active: AtomicU64,
    drained: Notify,
}

/// Tracks live sessions for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new session. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            inner: Arc::clone(&self.inner),
            id: ConnectionId::next(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Wait until no session is live or `deadline` passes.
    ///
    /// Returns `true` if every session finished in time.
    pub async fn drain(&self, deadline: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.inner.drained.notified();
                if self.active_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(deadline, wait).await.is_ok()
    }
}

/// Guard that tracks a session's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    inner: Arc<TrackerInner>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.drained.notify_waiters();
        }
        tracing::trace!(connection_id = %self.id, "Connection released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::next();
        let id2 = ConnectionId::next();
        assert_ne!(id1, id2);
        assert!(id2.to_string().starts_with("conn-"));
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);
        assert_ne!(guard1.id(), guard2.id());

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn drain_waits_for_last_guard() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });

        assert!(tracker.drain(Duration::from_secs(2)).await);
        releaser.await.unwrap();
    }

    #[tokio::test]
    async fn drain_gives_up_after_deadline() {
        let tracker = ConnectionTracker::new();
        let _guard = tracker.track();
        assert!(!tracker.drain(Duration::from_millis(20)).await);
    }
}
