//! Connection identity, state and lifetime tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Publish each connection's state and load to the routing table
//! - Let the client wait for every connection task to finish

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough: only uniqueness matters.
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

/// Connection lifecycle state.
///
/// ```text
/// Connecting → Idle ⇄ Active → Draining → Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Waiting on the connector.
    Connecting = 0,
    /// Connected, nothing in flight; the idle timer is armed.
    Idle = 1,
    /// At least one request is being written or awaiting its response.
    Active = 2,
    /// No new requests; finishing what is in flight before closing.
    Draining = 3,
    /// Terminal.
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Idle,
            2 => ConnectionState::Active,
            3 => ConnectionState::Draining,
            _ => ConnectionState::Closed,
        }
    }

    /// Whether new requests may still be routed to the connection.
    pub fn accepts_requests(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Idle | ConnectionState::Active
        )
    }
}

/// Load and state of one connection, shared between its task and the
/// routing table.
#[derive(Debug)]
pub struct ConnectionLoad {
    queued: AtomicUsize,
    state: AtomicU8,
}

impl ConnectionLoad {
    pub fn new() -> Self {
        Self {
            queued: AtomicUsize::new(0),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
        }
    }

    /// Requests routed to the connection and not yet finished.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn acquire(&self) {
        self.queued.fetch_add(1, Ordering::AcqRel);
    }

    pub fn release(&self) {
        let _ = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl Default for ConnectionLoad {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks live connection tasks so shutdown can wait for them.
///
/// The live count is published through a watch channel.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    count_tx: Arc<watch::Sender<u64>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { count_tx: Arc::new(tx) }
    }

    /// Record a new connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.count_tx.send_modify(|n| *n += 1);
        ConnectionGuard {
            count_tx: Arc::clone(&self.count_tx),
            id: ConnectionId::new(),
        }
    }

    /// Current live connection count.
    pub fn active_count(&self) -> u64 {
        *self.count_tx.borrow()
    }

    /// Wait until every tracked connection has finished.
    pub async fn wait_idle(&self) {
        let mut rx = self.count_tx.subscribe();
        // the sender lives in self, so this only fails if it was dropped
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks one connection task's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    count_tx: Arc<watch::Sender<u64>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count_tx.send_modify(|n| *n = n.saturating_sub(1));
        tracing::trace!(connection_id = %self.id, "Connection task finished");
    }
}
