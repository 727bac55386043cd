//! Typed lifecycle notifications.
//!
//! One broadcast channel per event kind. Listeners subscribe through
//! [`crate::Client::subscribe`]; a lagging listener loses the oldest events
//! of that kind only.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::error::ClientError;
use crate::net::connection::ConnectionId;
use crate::net::origin::Origin;

const EVENT_CAPACITY: usize = 256;

/// Why a connection closed without a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// No request arrived within the keep-alive window.
    IdleTimeout,
    /// The peer closed while nothing was in flight.
    RemoteClosed,
    /// The connection stopped taking requests (server `Connection: close`,
    /// caller `connection: close`, abandoned response) and finished the rest.
    Drained,
    /// [`crate::Client::close`].
    ClientClose,
    /// [`crate::Client::destroy`].
    Destroyed,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::RemoteClosed => "remote_closed",
            CloseReason::Drained => "drained",
            CloseReason::ClientClose => "client_close",
            CloseReason::Destroyed => "destroyed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectEvent {
    pub origin: Origin,
    pub connection: ConnectionId,
}

/// A connection was torn down by a protocol violation or socket error.
#[derive(Debug, Clone)]
pub struct DisconnectEvent {
    pub origin: Origin,
    pub connection: ConnectionId,
    pub error: ClientError,
}

/// The connector failed before a connection existed.
#[derive(Debug, Clone)]
pub struct ConnectionErrorEvent {
    pub origin: Origin,
    pub connection: ConnectionId,
    pub error: ClientError,
}

#[derive(Debug, Clone)]
pub struct ClosedEvent {
    pub origin: Origin,
    pub connection: ConnectionId,
    pub reason: CloseReason,
}

/// Sending side, owned by the client.
#[derive(Debug)]
pub struct Events {
    connect: broadcast::Sender<ConnectEvent>,
    disconnect: broadcast::Sender<DisconnectEvent>,
    connection_error: broadcast::Sender<ConnectionErrorEvent>,
    closed: broadcast::Sender<ClosedEvent>,
}

impl Events {
    pub fn new() -> Self {
        Self {
            connect: broadcast::channel(EVENT_CAPACITY).0,
            disconnect: broadcast::channel(EVENT_CAPACITY).0,
            connection_error: broadcast::channel(EVENT_CAPACITY).0,
            closed: broadcast::channel(EVENT_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            connect: self.connect.subscribe(),
            disconnect: self.disconnect.subscribe(),
            connection_error: self.connection_error.subscribe(),
            closed: self.closed.subscribe(),
        }
    }

    // Sends fail only when nobody listens.

    pub fn connect(&self, event: ConnectEvent) {
        let _ = self.connect.send(event);
    }

    pub fn disconnect(&self, event: DisconnectEvent) {
        let _ = self.disconnect.send(event);
    }

    pub fn connection_error(&self, event: ConnectionErrorEvent) {
        let _ = self.connection_error.send(event);
    }

    pub fn closed(&self, event: ClosedEvent) {
        let _ = self.closed.send(event);
    }
}

impl Default for Events {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side handed to listeners.
#[derive(Debug)]
pub struct Subscription {
    pub connect: broadcast::Receiver<ConnectEvent>,
    pub disconnect: broadcast::Receiver<DisconnectEvent>,
    pub connection_error: broadcast::Receiver<ConnectionErrorEvent>,
    pub closed: broadcast::Receiver<ClosedEvent>,
}

impl Subscription {
    /// Wait for exactly `count` disconnect notifications, giving up after
    /// `timeout`. Returns what arrived.
    pub async fn expect_disconnects(&mut self, count: usize, timeout: Duration) -> Vec<DisconnectEvent> {
        let mut seen = Vec::with_capacity(count);
        let deadline = tokio::time::Instant::now() + timeout;
        while seen.len() < count {
            match tokio::time::timeout_at(deadline, self.disconnect.recv()).await {
                Ok(Ok(event)) => seen.push(event),
                Ok(Err(broadcast::error::RecvError::Lagged(missed))) => {
                    tracing::warn!(missed, "Disconnect listener lagged");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
            }
        }
        seen
    }

    /// Next disconnect notification already delivered, if any.
    pub fn try_disconnect(&mut self) -> Option<DisconnectEvent> {
        loop {
            match self.disconnect.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
