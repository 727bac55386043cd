//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits >= 1)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before a client is built from the config

use std::fmt;

use crate::config::schema::ClientConfig;

/// Smallest head size that still fits a realistic status line and headers.
const MIN_HEADER_SIZE: usize = 1024;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.connections_per_origin == 0 {
        errors.push(ValidationError::new("connections_per_origin", "must be at least 1"));
    }
    if config.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("connect_timeout_ms", "must be greater than 0"));
    }
    if config.keep_alive_timeout_ms == 0 {
        errors.push(ValidationError::new("keep_alive_timeout_ms", "must be greater than 0"));
    }
    if config.keep_alive_max_timeout_ms < config.keep_alive_timeout_ms {
        errors.push(ValidationError::new(
            "keep_alive_max_timeout_ms",
            format!(
                "must not be below keep_alive_timeout_ms ({})",
                config.keep_alive_timeout_ms
            ),
        ));
    }
    if config.max_header_size < MIN_HEADER_SIZE {
        errors.push(ValidationError::new(
            "max_header_size",
            format!("must be at least {MIN_HEADER_SIZE} bytes"),
        ));
    }
    if config.retry.enabled && config.retry.max_delay_ms < config.retry.base_delay_ms {
        errors.push(ValidationError::new(
            "retry.max_delay_ms",
            "must not be below retry.base_delay_ms",
        ));
    }
    if !matches!(
        config.observability.log_level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level {:?}", config.observability.log_level),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&ClientConfig::default()).is_ok());
    }

    #[test]
    fn pipelining_zero_is_allowed() {
        let config = ClientConfig {
            pipelining: 0,
            ..ClientConfig::default()
        };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn reports_every_error() {
        let mut config = ClientConfig {
            connections_per_origin: 0,
            connect_timeout_ms: 0,
            max_header_size: 10,
            ..ClientConfig::default()
        };
        config.observability.log_level = "loud".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "connections_per_origin",
                "connect_timeout_ms",
                "max_header_size",
                "observability.log_level"
            ]
        );
    }
}
