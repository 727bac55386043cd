//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files and
//! fill missing fields from their `Default` impls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for a client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Maximum in-flight requests per connection. 0 and 1 both disable
    /// pipelining.
    pub pipelining: usize,

    /// Maximum concurrent connections per origin.
    pub connections_per_origin: usize,

    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Idle timeout when the server sent no keep-alive hint, in milliseconds.
    pub keep_alive_timeout_ms: u64,

    /// Upper bound for a server-provided keep-alive timeout, in milliseconds.
    pub keep_alive_max_timeout_ms: u64,

    /// Subtracted from a server-provided keep-alive timeout so the client
    /// gives up on the connection before the server does, in milliseconds.
    pub keep_alive_timeout_threshold_ms: u64,

    /// Maximum size of a response head in bytes.
    pub max_header_size: usize,

    /// Requeue policy for requests that never reached the wire.
    pub retry: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pipelining: 1,
            connections_per_origin: 1,
            connect_timeout_ms: 10_000,
            keep_alive_timeout_ms: 4_000,
            keep_alive_max_timeout_ms: 600_000,
            keep_alive_timeout_threshold_ms: 1_000,
            max_header_size: 16 * 1024,
            retry: RetryConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Requeue unsent requests after a connection failure.
    pub enabled: bool,

    /// Maximum number of requeues per request.
    pub max_attempts: u32,

    /// Also requeue POST/PATCH/CONNECT and other non-idempotent requests.
    pub retry_non_idempotent: bool,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            retry_non_idempotent: false,
            base_delay_ms: 50,
            max_delay_ms: 2000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Record metrics through the `metrics` facade.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
        }
    }
}
