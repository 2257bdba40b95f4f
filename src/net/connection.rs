//! Connection identity and live-connection accounting.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count open connections with atomics only
//! - Let shutdown wait for the count to reach zero

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection number, used to correlate log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks open connections for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
    /// Woken every time the count drops to zero.
    idle: Arc<Notify>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new open connection. The count drops again when the
    /// returned guard is dropped, including during a panic unwind.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            tracker: self.clone(),
            id: ConnectionId::next(),
        }
    }

    /// Current open connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until no connection is open.
    pub async fn wait_idle(&self) {
        loop {
            // Register before checking so a concurrent drop cannot be missed.
            let notified = self.idle.notified();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Wait until no connection is open, giving up after `limit`.
    /// Returns `true` if the count reached zero in time.
    pub async fn wait_idle_within(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.wait_idle()).await.is_ok()
    }
}

/// Counts one open connection until dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let previous = self.tracker.active_count.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            self.tracker.idle.notify_waiters();
        }
        tracing::trace!(connection_id = %self.id, "Connection released");
    }
}
