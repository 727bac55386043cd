//! Per-connection FIFO scheduler.
//!
//! Two queues: `pending` (accepted, not yet written) and `in_flight`
//! (written or being written, response not yet complete). Responses always
//! belong to the front of `in_flight`.

use std::collections::VecDeque;

/// Something the scheduler can order.
pub trait Pipelined {
    /// Must be the only request in flight while it is dispatched.
    fn is_exclusive(&self) -> bool;
}

#[derive(Debug)]
pub struct Scheduler<T> {
    pending: VecDeque<T>,
    in_flight: VecDeque<T>,
    limit: usize,
}

impl<T: Pipelined> Scheduler<T> {
    /// `limit` of 0 or 1 disables pipelining.
    pub fn new(limit: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    pub fn enqueue(&mut self, item: T) {
        self.pending.push_back(item);
    }

    /// Whether the head of `pending` may be dispatched now.
    pub fn can_dispatch(&self) -> bool {
        let Some(next) = self.pending.front() else {
            return false;
        };
        if self.in_flight.len() >= self.limit {
            return false;
        }
        if self.in_flight.back().is_some_and(|last| last.is_exclusive()) {
            return false;
        }
        !next.is_exclusive() || self.in_flight.is_empty()
    }

    /// Move the head of `pending` into flight, returning it for writing.
    pub fn dispatch_next(&mut self) -> Option<&mut T> {
        if !self.can_dispatch() {
            return None;
        }
        let item = self.pending.pop_front()?;
        self.in_flight.push_back(item);
        self.in_flight.back_mut()
    }

    /// Oldest unmatched request: the one the next response belongs to.
    pub fn front(&self) -> Option<&T> {
        self.in_flight.front()
    }

    pub fn front_mut(&mut self) -> Option<&mut T> {
        self.in_flight.front_mut()
    }

    /// Most recently dispatched request.
    pub fn back_mut(&mut self) -> Option<&mut T> {
        self.in_flight.back_mut()
    }

    /// The front request's response finished.
    pub fn complete_front(&mut self) -> Option<T> {
        self.in_flight.pop_front()
    }

    /// Withdraw the most recently dispatched request.
    pub fn withdraw_back(&mut self) -> Option<T> {
        self.in_flight.pop_back()
    }

    pub fn in_flight(&self) -> impl Iterator<Item = &T> {
        self.in_flight.iter()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    /// Empty both queues, in-flight first, each in FIFO order.
    pub fn drain_all(&mut self) -> (Vec<T>, Vec<T>) {
        (self.in_flight.drain(..).collect(), self.pending.drain(..).collect())
    }
}
