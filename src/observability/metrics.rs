//! Metrics collection.
//!
//! # Metrics
//! - `h1_responses_total` (counter): responses by status class
//! - `h1_request_failures_total` (counter): failed requests by error code
//! - `h1_request_duration_seconds` (histogram): submit to response end
//! - `h1_disconnects_total` (counter): violated connections by error code
//! - `h1_connect_errors_total` (counter): connector failures by error code
//! - `h1_connections_opened_total` / `h1_connections_closed_total` (counters)
//! - `h1_open_connections` (gauge)
//! - `h1_requeues_total` (counter)
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; installing a recorder
//!   (Prometheus or otherwise) is up to the application
//! - A process-wide switch turns recording off entirely

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static ENABLED: AtomicBool = AtomicBool::new(true);

pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

pub fn record_response(status: u16) {
    if is_enabled() {
        ::metrics::counter!("h1_responses_total", "status" => status_class(status)).increment(1);
    }
}

pub fn record_request_duration(elapsed: Duration) {
    if is_enabled() {
        ::metrics::histogram!("h1_request_duration_seconds").record(elapsed.as_secs_f64());
    }
}

pub fn record_request_failure(code: &'static str) {
    if is_enabled() {
        ::metrics::counter!("h1_request_failures_total", "code" => code).increment(1);
    }
}

pub fn record_disconnect(code: &'static str) {
    if is_enabled() {
        ::metrics::counter!("h1_disconnects_total", "code" => code).increment(1);
        ::metrics::gauge!("h1_open_connections").decrement(1.0);
    }
}

pub fn record_connect_error(code: &'static str) {
    if is_enabled() {
        ::metrics::counter!("h1_connect_errors_total", "code" => code).increment(1);
    }
}

pub fn record_connection_opened() {
    if is_enabled() {
        ::metrics::counter!("h1_connections_opened_total").increment(1);
        ::metrics::gauge!("h1_open_connections").increment(1.0);
    }
}

pub fn record_connection_closed(reason: &'static str) {
    if is_enabled() {
        ::metrics::counter!("h1_connections_closed_total", "reason" => reason).increment(1);
        ::metrics::gauge!("h1_open_connections").decrement(1.0);
    }
}

pub fn record_requeue() {
    if is_enabled() {
        ::metrics::counter!("h1_requeues_total").increment(1);
    }
}
