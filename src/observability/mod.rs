//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Connection tasks and the client produce:
//!     → tracing events (connect, dispatch, violations, requeues, closures)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → logging.rs subscriber (stderr)
//!     → whatever `metrics` recorder the application installs
//! ```
//!
//! # Design Decisions
//! - Connection and request IDs are attached to every event
//! - Metrics are cheap (atomic increments) and can be switched off

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
