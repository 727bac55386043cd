//! Per-connection request pipeline.
//!
//! # Data Flow
//! ```text
//! Command::Dispatch(Exchange) from the client
//!     → scheduler.rs (pending FIFO, in-flight limit, exclusivity)
//!     → writer.rs (head + body into the outbound buffer, length check)
//!     → socket
//!
//! socket bytes
//!     → parser (tokenizer callbacks)
//!     → reader.rs (match to oldest in-flight, length check, deliver)
//!     → driver.rs (keep-alive, idle timer, teardown)
//! ```
//!
//! # Design Decisions
//! - One task per connection owns the socket, the queues and the timers;
//!   nothing else touches them
//! - Every suspension point in the driver is a cancel-safe future inside a
//!   single `select!`, so state changes happen between polls only
//! - A request counts as sent once any of its bytes left the outbound
//!   buffer; from then on it can only fail, never be replayed

pub mod driver;
pub mod reader;
pub mod scheduler;
pub mod writer;

use std::time::Instant;

use crate::error::ClientError;
use crate::http::method::Method;
use crate::http::request::{Body, ValidatedRequest};
use crate::http::response::HeadSender;
use crate::net::origin::Origin;
use scheduler::Pipelined;
use writer::RequestWriter;

pub use driver::{ConnectionDriver, DriverExit, ExitReason};

/// A submitted request travelling between the client and a connection.
#[derive(Debug)]
pub struct Exchange {
    pub request: ValidatedRequest,
    pub origin: Origin,
    pub head_tx: Option<HeadSender>,
    /// Connections this request was handed back from.
    pub attempts: u32,
    pub submitted: Instant,
}

impl Exchange {
    pub fn new(request: ValidatedRequest, origin: Origin, head_tx: HeadSender) -> Self {
        Self {
            request,
            origin,
            head_tx: Some(head_tx),
            attempts: 0,
            submitted: Instant::now(),
        }
    }

    /// Resolve the caller's pending response with `err`.
    pub fn fail(mut self, err: ClientError) {
        if let Some(tx) = self.head_tx.take() {
            let _ = tx.send(Err(err));
        }
    }

    /// The caller stopped waiting for the response.
    pub fn is_abandoned(&self) -> bool {
        self.head_tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

/// Messages from the client to a connection task.
#[derive(Debug)]
pub enum Command {
    Dispatch(Box<Exchange>),
    /// Finish everything queued, then close.
    Close,
}

/// An exchange owned by a connection's scheduler.
pub struct Slot {
    pub exchange: Exchange,
    pub writer: Option<RequestWriter>,
    /// Outbound byte offset at which this request's head starts.
    pub wire_start: u64,
}

impl Slot {
    pub fn new(exchange: Exchange) -> Self {
        Self {
            exchange,
            writer: None,
            wire_start: 0,
        }
    }

    pub fn is_head(&self) -> bool {
        self.exchange.request.request.method == Method::Head
    }

    /// Whether the request body still has chunks to write.
    pub fn writing(&self) -> bool {
        self.writer.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Return to an unsent exchange, reclaiming a streamed body that was not
    /// touched yet.
    pub fn into_unsent(mut self) -> Exchange {
        if let Some(stream) = self.writer.as_mut().and_then(|w| w.take_untouched()) {
            self.exchange.request.request.body = Body::Stream(stream);
        }
        self.exchange
    }
}

impl Pipelined for Slot {
    fn is_exclusive(&self) -> bool {
        self.exchange.request.is_exclusive()
    }
}
