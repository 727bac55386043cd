//! Origin → connections routing table.
//!
//! # Design Decisions
//! - The table is the only state shared between connection tasks; it lives
//!   in a `DashMap` so checkouts for different origins do not contend
//! - Selection order: a connection with pipeline headroom, then a new
//!   connection while under the per-origin cap, then the least loaded one
//! - Connections that stopped accepting requests do not count toward the cap

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::net::connection::{ConnectionGuard, ConnectionId, ConnectionLoad, ConnectionTracker};
use crate::net::origin::Origin;
use crate::pipeline::Command;

/// The client's end of one connection task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub tx: mpsc::UnboundedSender<Command>,
    pub load: Arc<ConnectionLoad>,
}

impl ConnectionHandle {
    fn usable(&self) -> bool {
        !self.tx.is_closed() && self.load.state().accepts_requests()
    }
}

/// Outcome of a routing decision.
pub enum Checkout {
    Existing(ConnectionHandle),
    /// A new connection was registered; the caller must start its task.
    Created {
        handle: ConnectionHandle,
        rx: mpsc::UnboundedReceiver<Command>,
        guard: ConnectionGuard,
    },
}

#[derive(Debug)]
pub struct RoutingTable {
    table: DashMap<Origin, Vec<ConnectionHandle>>,
    per_origin: usize,
    pipelining: usize,
}

impl RoutingTable {
    pub fn new(per_origin: usize, pipelining: usize) -> Self {
        Self {
            table: DashMap::new(),
            per_origin: per_origin.max(1),
            pipelining: pipelining.max(1),
        }
    }

    /// Pick or create the connection the next request for `origin` goes to.
    pub fn checkout(&self, origin: &Origin, tracker: &ConnectionTracker) -> Checkout {
        let mut entry = self.table.entry(origin.clone()).or_default();
        let handles = entry.value_mut();
        handles.retain(|h| !h.tx.is_closed());

        let usable: Vec<&ConnectionHandle> = handles.iter().filter(|h| h.usable()).collect();

        let with_headroom = usable
            .iter()
            .filter(|h| h.load.queued() < self.pipelining)
            .min_by_key(|h| h.load.queued());
        if let Some(handle) = with_headroom {
            return Checkout::Existing((*handle).clone());
        }

        if usable.len() >= self.per_origin {
            if let Some(handle) = usable.iter().min_by_key(|h| h.load.queued()) {
                return Checkout::Existing((*handle).clone());
            }
        }

        let guard = tracker.track();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle {
            id: guard.id(),
            tx,
            load: Arc::new(ConnectionLoad::new()),
        };
        handles.push(handle.clone());
        tracing::debug!(origin = %origin, connection_id = %handle.id, "Opening connection");
        Checkout::Created { handle, rx, guard }
    }

    /// Forget a connection.
    pub fn remove(&self, origin: &Origin, id: ConnectionId) {
        if let Some(mut handles) = self.table.get_mut(origin) {
            handles.retain(|h| h.id != id);
        }
        self.table.remove_if(origin, |_, handles| handles.is_empty());
    }

    /// Every registered connection, across origins.
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.table
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect()
    }

    pub fn connection_count(&self, origin: &Origin) -> usize {
        self.table.get(origin).map_or(0, |handles| handles.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::ConnectionState;

    fn created(checkout: Checkout) -> (ConnectionHandle, mpsc::UnboundedReceiver<Command>, ConnectionGuard) {
        match checkout {
            Checkout::Created { handle, rx, guard } => (handle, rx, guard),
            Checkout::Existing(_) => panic!("expected a new connection"),
        }
    }

    fn existing(checkout: Checkout) -> ConnectionHandle {
        match checkout {
            Checkout::Existing(handle) => handle,
            Checkout::Created { .. } => panic!("expected an existing connection"),
        }
    }

    #[test]
    fn prefers_headroom_then_new_then_least_loaded() {
        let tracker = ConnectionTracker::new();
        let table = RoutingTable::new(2, 1);
        let origin = Origin::http("localhost", 80);

        let (a, _rx_a, _ga) = created(table.checkout(&origin, &tracker));
        assert_eq!(existing(table.checkout(&origin, &tracker)).id, a.id);

        a.load.acquire();
        let (b, _rx_b, _gb) = created(table.checkout(&origin, &tracker));
        assert_ne!(a.id, b.id);
        assert_eq!(tracker.active_count(), 2);

        b.load.acquire();
        b.load.acquire();
        assert_eq!(existing(table.checkout(&origin, &tracker)).id, a.id, "least loaded at the cap");
    }

    #[test]
    fn draining_connections_are_skipped() {
        let tracker = ConnectionTracker::new();
        let table = RoutingTable::new(1, 1);
        let origin = Origin::http("localhost", 80);

        let (a, _rx, _g) = created(table.checkout(&origin, &tracker));
        a.load.set_state(ConnectionState::Draining);
        let (b, _rx_b, _gb) = created(table.checkout(&origin, &tracker));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn closed_channels_and_removal() {
        let tracker = ConnectionTracker::new();
        let table = RoutingTable::new(1, 1);
        let origin = Origin::http("localhost", 80);

        let (a, rx, _g) = created(table.checkout(&origin, &tracker));
        drop(rx);
        let (b, _rx_b, _gb) = created(table.checkout(&origin, &tracker));
        assert_ne!(a.id, b.id);
        assert_eq!(table.connection_count(&origin), 1);

        table.remove(&origin, b.id);
        assert_eq!(table.connection_count(&origin), 0);
        assert!(table.handles().is_empty());
    }
}
