//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Request for an origin
//!     → origin.rs (scheme/host/port identity, routing key)
//!     → connector.rs (connect with timeout, yields a boxed duplex stream)
//!     → connection.rs (ID, published state/load, lifetime tracking)
//!     → Hand off to the pipeline driver
//!
//! Connection States:
//!     Connecting → Idle ⇄ Active → Draining → Closed
//! ```
//!
//! # Design Decisions
//! - Transport establishment sits behind the `Connector` trait
//! - Each connection task is tracked for graceful shutdown

pub mod connection;
pub mod connector;
pub mod origin;

pub use connection::{ConnectionId, ConnectionState};
pub use connector::{BoxedTransport, Connector, TcpConnector, Transport};
pub use origin::{Origin, Scheme};
