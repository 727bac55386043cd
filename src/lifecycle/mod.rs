//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Client::close():
//!     Reject new submits → Close command to every connection
//!     → connections finish queued work → tracker reaches zero
//!
//! Client::destroy():
//!     shutdown.rs trigger → every connection task fails its requests
//!     with ERR_CLIENT_DESTROYED → tracker reaches zero
//! ```
//!
//! # Design Decisions
//! - Graceful close goes through each connection's command channel so it
//!   queues behind already submitted requests
//! - Destroy is a broadcast so it overtakes everything

pub mod shutdown;

pub use shutdown::Shutdown;
