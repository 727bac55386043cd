//! HTTP/1.1 dispatch core: persistent connections, pipelining and strict
//! `content-length` enforcement on both request and response bodies.
//!
//! ```text
//! Client::submit ─▶ dispatch (routing) ─▶ pipeline driver ─▶ socket
//!                                              │
//!        PendingResponse ◀── reader ◀── parser ◀┘
//! ```

// Wire model
pub mod error;
pub mod http;
pub mod parser;

// Connections
pub mod net;
pub mod pipeline;

// Public surface
pub mod dispatch;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ClientConfig;
pub use dispatch::{Client, ClientBuilder, CloseReason, DisconnectEvent, Subscription};
pub use error::ClientError;
pub use http::{Body, Method, PendingResponse, Request, Response, ResponseBody};
pub use net::{Connector, Origin};
