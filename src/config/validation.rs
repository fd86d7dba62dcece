//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, buffers > 0, backlog > 0)
//! - Check that the metrics address parses when metrics are enabled
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// Smallest header limit that can hold a request line.
pub const MIN_HEADER_BYTES: usize = 16;

/// A single semantic problem with a configuration.
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

/// Check a configuration for semantic errors.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_host.trim().is_empty() {
        errors.push(ValidationError::new("listener.bind_host", "must not be empty"));
    }
    if config.listener.backlog == 0 {
        errors.push(ValidationError::new("listener.backlog", "must be greater than 0"));
    }
    if config.listener.max_connections == Some(0) {
        errors.push(ValidationError::new(
            "listener.max_connections",
            "must be greater than 0 when set",
        ));
    }

    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::new("timeouts.connect_ms", "must be greater than 0"));
    }
    if config.timeouts.idle_ms == 0 {
        errors.push(ValidationError::new("timeouts.idle_ms", "must be greater than 0"));
    }

    if config.limits.max_header_bytes < MIN_HEADER_BYTES {
        errors.push(ValidationError::new(
            "limits.max_header_bytes",
            format!("must be at least {}", MIN_HEADER_BYTES),
        ));
    }
    if config.limits.read_chunk_bytes == 0 {
        errors.push(ValidationError::new("limits.read_chunk_bytes", "must be greater than 0"));
    }
    if config.limits.relay_buffer_bytes == 0 {
        errors.push(ValidationError::new("limits.relay_buffer_bytes", "must be greater than 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
