//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (rates > 0, addresses parse)
//! - Catch settings that would make the admission engine misbehave
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// One semantic violation, pointing at the offending field.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn error(errors: &mut Vec<ValidationError>, field: &str, message: impl Into<String>) {
    errors.push(ValidationError {
        field: field.to_string(),
        message: message.into(),
    });
}

/// Validate the full config, collecting every violation.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        error(
            &mut errors,
            "listener.bind_address",
            "not a valid socket address",
        );
    }

    if config.upstream.host.is_empty() {
        error(&mut errors, "upstream.host", "must not be empty");
    }
    if config.upstream.port == 0 {
        error(&mut errors, "upstream.port", "must be nonzero");
    }

    if config.limits.search_max_rps <= 0.0 || !config.limits.search_max_rps.is_finite() {
        error(
            &mut errors,
            "limits.search_max_rps",
            "must be a positive finite rate",
        );
    }
    if config.limits.search_max_range_secs <= 0 {
        error(
            &mut errors,
            "limits.search_max_range_secs",
            "must be positive",
        );
    }
    if config.limits.search_path_marker.is_empty() {
        error(
            &mut errors,
            "limits.search_path_marker",
            "must not be empty",
        );
    }

    if config.pacing.sweep_every_calls == 0 {
        error(&mut errors, "pacing.sweep_every_calls", "must be nonzero");
    }

    if config.timeouts.request_secs == 0 {
        error(&mut errors, "timeouts.request_secs", "must be nonzero");
    }

    if config.security.identity_header.is_empty() {
        error(&mut errors, "security.identity_header", "must not be empty");
    }
    if config.security.max_body_size == 0 {
        error(&mut errors, "security.max_body_size", "must be nonzero");
    }

    match config.observability.log_format.as_str() {
        "json" | "pretty" => {}
        other => error(
            &mut errors,
            "observability.log_format",
            format!("unknown format '{}', expected 'json' or 'pretty'", other),
        ),
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        error(
            &mut errors,
            "observability.metrics_address",
            "not a valid socket address",
        );
    }

    if config.admin.enabled {
        if config.admin.api_key.is_empty() {
            error(&mut errors, "admin.api_key", "must not be empty");
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            error(
                &mut errors,
                "admin.bind_address",
                "not a valid socket address",
            );
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
