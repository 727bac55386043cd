//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Connection closes with unsent requests:
//!     → clean close: redispatch immediately
//!     → violation / socket error: retries.rs (attempt budget,
//!       idempotency, backoff + jitter) → redispatch or fail
//! ```
//!
//! # Design Decisions
//! - A request that reached the wire is never replayed
//! - Connect timeouts live in the connector; there is no per-request
//!   timeout in the core

pub mod retries;

pub use retries::{RetryDecision, RetryPolicy};
