//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (TTLs > 0, capacities > 0)
//! - Validate addresses and enumerated strings
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: PrefetchProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::PrefetchProxyConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    /// Human readable description.
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

/// Validate a configuration, collecting every violation.
pub fn validate_config(config: &PrefetchProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.prefetch.document_throttle_secs == 0 {
        errors.push(ValidationError::new(
            "prefetch.document_throttle_secs",
            "must be greater than 0",
        ));
    }
    if config.prefetch.head_read_limit == 0 {
        errors.push(ValidationError::new("prefetch.head_read_limit", "must be greater than 0"));
    }
    if config.prefetch.resource_extensions.is_empty() {
        errors.push(ValidationError::new(
            "prefetch.resource_extensions",
            "at least one extension is required",
        ));
    }
    for ext in &config.prefetch.resource_extensions {
        if ext.is_empty() || ext.starts_with('.') {
            errors.push(ValidationError::new(
                "prefetch.resource_extensions",
                format!("'{}' must be a bare extension such as \"js\"", ext),
            ));
        }
    }

    if config.push.response_ttl_secs == 0 {
        errors.push(ValidationError::new("push.response_ttl_secs", "must be greater than 0"));
    }
    if config.push.queue_capacity == 0 {
        errors.push(ValidationError::new("push.queue_capacity", "must be greater than 0"));
    }
    if config.push.max_record_bytes < 1024 {
        errors.push(ValidationError::new("push.max_record_bytes", "must be at least 1024"));
    }
    if config.push.purge_interval_secs == 0 {
        errors.push(ValidationError::new("push.purge_interval_secs", "must be greater than 0"));
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    match config.observability.log_format.as_str() {
        "pretty" | "json" => {}
        other => errors.push(ValidationError::new(
            "observability.log_format",
            format!("unknown format '{}', expected \"pretty\" or \"json\"", other),
        )),
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
