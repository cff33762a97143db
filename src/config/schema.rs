//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the search proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream search backend.
    pub upstream: UpstreamConfig,

    /// Admission limits for search queries.
    pub limits: LimitsConfig,

    /// Per-client pacing state management.
    pub pacing: PacingConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request hardening.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream search backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Backend host name or address.
    pub host: String,

    /// Backend port.
    pub port: u16,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9200,
        }
    }
}

/// Admission limits applied to search queries.
///
/// Loaded once; read-only for the lifetime of the process.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Fields a terms/terms_stats aggregation may never target.
    pub terms_forbidden_fields: Vec<String>,

    /// Maximum size of a terms aggregation (inclusive).
    pub terms_max_size: u64,

    /// Maximum query time-range width in seconds.
    pub search_max_range_secs: i64,

    /// Maximum number of facets per query.
    pub search_max_facets: u64,

    /// Nominal per-client search requests per second.
    pub search_max_rps: f64,

    /// Substring marking a path as search-sensitive.
    pub search_path_marker: String,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            terms_forbidden_fields: Vec::new(),
            terms_max_size: 100,
            search_max_range_secs: 86_400,
            search_max_facets: 10,
            search_max_rps: 5.0,
            search_path_marker: "search".to_string(),
        }
    }
}

/// Pacing state management.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Run the idle-slot sweep every N schedule calls.
    pub sweep_every_calls: u64,

    /// How long a client's slot may sit in the past before eviction.
    pub idle_grace_secs: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            sweep_every_calls: 1024,
            idle_grace_secs: 600,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 60 }
    }
}

/// Request hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Header carrying the already-authenticated client identity.
    pub identity_header: String,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            identity_header: "x-search-user".to_string(),
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format: "json" or "pretty".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API listener.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
