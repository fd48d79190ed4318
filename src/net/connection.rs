//! Connection lifecycle tracking and drain coordination.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count live units of work (client connections and tunnels)
//! - Broadcast drain state (Running → Draining → ForceClose)
//! - Wait, with a deadline, for the live count to reach zero
//!
//! # Design Decisions
//! - Guards decrement on drop, so a panicking task still releases its slot
//! - Every guard keeps the drain channel alive; a receiver never sees a
//!   closed channel while its work is tracked

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Notify};
use tokio::time::Instant;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Server-wide drain state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    /// Accepting and serving normally.
    Running,
    /// Finish in-flight work, take nothing new.
    Draining,
    /// Deadline passed; drop whatever is left.
    ForceClose,
}

#[derive(Debug)]
struct TrackerInner {
    active_count: AtomicU64,
    idle: Notify,
    state_tx: watch::Sender<DrainState>,
}

/// Tracks live work for graceful shutdown.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(DrainState::Running);
        Self {
            inner: Arc::new(TrackerInner {
                active_count: AtomicU64::new(0),
                idle: Notify::new(),
                state_tx,
            }),
        }
    }

    /// Record a new unit of work. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.inner.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            inner: Arc::clone(&self.inner),
            id: ConnectionId::new(),
        }
    }

    /// Get current active count.
    pub fn active_count(&self) -> u64 {
        self.inner.active_count.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> DrainState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver for drain state changes.
    pub fn subscribe(&self) -> watch::Receiver<DrainState> {
        self.inner.state_tx.subscribe()
    }

    /// Ask all tracked work to finish.
    pub fn begin_drain(&self) {
        self.advance(DrainState::Draining);
    }

    /// Tell all remaining work to close immediately.
    pub fn force_close(&self) {
        self.advance(DrainState::ForceClose);
    }

    fn advance(&self, next: DrainState) {
        self.inner.state_tx.send_if_modified(|state| {
            let forward = matches!(
                (*state, next),
                (DrainState::Running, DrainState::Draining)
                    | (DrainState::Running, DrainState::ForceClose)
                    | (DrainState::Draining, DrainState::ForceClose)
            );
            if forward {
                *state = next;
            }
            forward
        });
    }

    /// Wait until the active count reaches zero or `deadline` passes.
    ///
    /// Returns true if everything finished in time.
    pub async fn wait_idle(&self, deadline: Instant) -> bool {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent drop is not missed.
            notified.as_mut().enable();

            if self.active_count() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.active_count() == 0;
            }
        }
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until `state` leaves `Running`.
pub async fn draining(state: &mut watch::Receiver<DrainState>) {
    if state.wait_for(|s| *s != DrainState::Running).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Wait until `state` reaches `ForceClose`.
pub async fn force_closed(state: &mut watch::Receiver<DrainState>) {
    if state.wait_for(|s| *s == DrainState::ForceClose).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Guard that tracks a unit of work's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    inner: Arc<TrackerInner>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Drain state receiver tied to this guard's tracker.
    pub fn subscribe(&self) -> watch::Receiver<DrainState> {
        self.inner.state_tx.subscribe()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.inner.active_count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
