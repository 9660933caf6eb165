//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, threshold >= 1)
//! - Check that every configured endpoint normalizes
//! - Check backend URLs are present where required
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: CascadeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{BackendKind, CascadeConfig};
use crate::endpoint::EndpointKey;

/// One semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every semantic rule, collecting all violations.
pub fn validate_config(config: &CascadeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be at least 1"));
    }

    if config.breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("breaker.failure_threshold", "must be at least 1"));
    }
    if config.breaker.open_timeout_secs == 0 {
        errors.push(ValidationError::new("breaker.open_timeout_secs", "must be at least 1"));
    }
    if config.downstream.timeout_secs == 0 {
        errors.push(ValidationError::new("downstream.timeout_secs", "must be at least 1"));
    }
    if config.tasks.max_in_flight == 0 {
        errors.push(ValidationError::new("tasks.max_in_flight", "must be at least 1"));
    }

    if config.store.backend == BackendKind::Redis && config.store.url.is_none() {
        errors.push(ValidationError::new("store.url", "required for the redis backend"));
    }
    if config.store.scan_page_size == 0 {
        errors.push(ValidationError::new("store.scan_page_size", "must be at least 1"));
    }
    if config.broker.backend == BackendKind::Redis && config.broker.url.is_none() {
        errors.push(ValidationError::new("broker.url", "required for the redis backend"));
    }
    if config.broker.retry_interval_secs == 0 {
        errors.push(ValidationError::new("broker.retry_interval_secs", "must be at least 1"));
    }
    if config.broker.stream_max_len == 0 {
        errors.push(ValidationError::new("broker.stream_max_len", "must be at least 1"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }
    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must not be empty when admin is enabled"));
    }

    for (i, entry) in config.alternative_endpoints.iter().enumerate() {
        let field = format!("alternative_endpoints[{}]", i);
        let primary = match EndpointKey::new(&entry.method, &entry.endpoint) {
            Ok(key) => Some(key),
            Err(e) => {
                errors.push(ValidationError::new(&field, e.to_string()));
                None
            }
        };
        if entry.alternatives.is_empty() {
            errors.push(ValidationError::new(&field, "lists no alternatives"));
        }

        for (j, alt) in entry.alternatives.iter().enumerate() {
            let alt_field = format!("{}.alternatives[{}]", field, j);
            match EndpointKey::new(&alt.method, &alt.endpoint) {
                Ok(key) if primary.as_ref() == Some(&key) => {
                    errors.push(ValidationError::new(alt_field, "is the primary endpoint itself"));
                }
                Ok(_) => {}
                Err(e) => errors.push(ValidationError::new(alt_field, e.to_string())),
            }
        }
    }

    for (i, entry) in config.exceptions.iter().enumerate() {
        if let Err(e) = EndpointKey::new(&entry.method, &entry.endpoint) {
            errors.push(ValidationError::new(format!("exceptions[{}]", i), e.to_string()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
