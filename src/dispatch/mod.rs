//! Dispatch coordinator subsystem.
//!
//! # Data Flow
//! ```text
//! Client::submit(Request)
//!     → request validation (no network)
//!     → routing.rs (pick or open a connection for the origin)
//!     → connection task (pipeline driver)
//!
//! Connection task exit
//!     → events.rs (connect / disconnect / connection_error / closed)
//!     → client.rs (requeue unsent requests or fail them)
//! ```
//!
//! # Design Decisions
//! - The routing table is the only state shared between connections
//! - Notifications are typed broadcast channels, one per event kind

pub mod client;
pub mod events;
pub mod routing;

pub use client::{Client, ClientBuilder, TokenizerFactory};
pub use events::{
    CloseReason, ClosedEvent, ConnectEvent, ConnectionErrorEvent, DisconnectEvent, Subscription,
};
