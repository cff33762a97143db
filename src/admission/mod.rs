//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! streamed chunks
//!     → assembler.rs (contiguous body)
//!     → analyzer.rs (RiskProfile: range width, facet count, term scan)
//!     → policy.rs (ordered limit checks)
//!     → scheduler.rs (cost-weighted per-client delay)
//!     → AdmissionEngine::admit → AdmissionDecision
//! ```
//!
//! # Design Decisions
//! - One immutable `RawRequest` flows through a pure pipeline of stages;
//!   each stage is unit-testable in isolation
//! - The scheduler's slot map is the only shared mutable state
//! - Rejections are terminal: a malformed or over-limit request is never
//!   retried

pub mod analyzer;
pub mod assembler;
pub mod policy;
pub mod scheduler;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

pub use analyzer::RiskProfile;
pub use assembler::BodyBuffer;
pub use scheduler::PacingScheduler;

use crate::config::{LimitsConfig, PacingConfig};
use crate::observability::metrics;

/// A completed request as handed over by the transport.
///
/// Immutable once assembled; the engine never mutates it.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub path: String,
    pub method: String,
    /// Authenticated client identity, already resolved by the caller.
    pub identity: Option<String>,
    pub body: Bytes,
}

/// The engine's single output per request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AdmissionDecision {
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

impl AdmissionDecision {
    /// Grant for a non-sensitive path: no reason, no delay.
    fn bypass() -> Self {
        Self {
            granted: true,
            reason: None,
            delay_ms: None,
        }
    }

    fn granted(delay_ms: u64) -> Self {
        Self {
            granted: true,
            reason: Some("OK".to_string()),
            delay_ms: Some(delay_ms),
        }
    }

    fn denied(reason: String) -> Self {
        Self {
            granted: false,
            reason: Some(reason),
            delay_ms: None,
        }
    }
}

/// Terminal admission failures.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Sensitive path without a client identity.
    #[error("no user auth")]
    IdentityMissing,

    /// Body required structured parsing and did not parse.
    #[error("request parsing error")]
    ParseError,

    /// A limit check failed; the reason is already human-readable.
    #[error("{reason}")]
    PolicyViolation { reason: String },
}

impl AdmissionError {
    /// Bounded-cardinality label for the denial counter.
    fn metric_label(&self) -> &'static str {
        match self {
            Self::IdentityMissing => "no_auth",
            Self::ParseError => "parse_error",
            Self::PolicyViolation { .. } => "policy",
        }
    }
}

/// Composes analyzer, validator and scheduler into one decision per request.
pub struct AdmissionEngine {
    limits: LimitsConfig,
    scheduler: PacingScheduler,
}

impl AdmissionEngine {
    pub fn new(limits: LimitsConfig, pacing: PacingConfig) -> Self {
        let scheduler = PacingScheduler::new(limits.search_max_rps, pacing);
        Self { limits, scheduler }
    }

    /// Decide whether to forward, reject or delay one request.
    ///
    /// `now_ms` is the caller's monotonic clock in milliseconds; it only
    /// feeds the pacing scheduler.
    pub fn admit(&self, request: &RawRequest, now_ms: u64) -> AdmissionDecision {
        if !request.path.contains(&self.limits.search_path_marker) {
            return AdmissionDecision::bypass();
        }

        match self.check(request, now_ms) {
            Ok(delay_ms) => AdmissionDecision::granted(delay_ms),
            Err(err) => {
                metrics::record_denial(err.metric_label());
                AdmissionDecision::denied(err.to_string())
            }
        }
    }

    fn check(&self, request: &RawRequest, now_ms: u64) -> Result<u64, AdmissionError> {
        let identity = request
            .identity
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(AdmissionError::IdentityMissing)?;

        let profile = analyzer::analyze(&request.body, &self.limits).map_err(|err| {
            tracing::warn!(path = %request.path, error = %err, "request body did not parse");
            AdmissionError::ParseError
        })?;

        policy::validate(&profile, &self.limits)
            .map_err(|reason| AdmissionError::PolicyViolation { reason })?;

        Ok(self.scheduler.schedule(identity, &profile, now_ms))
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    pub fn tracked_clients(&self) -> usize {
        self.scheduler.tracked_clients()
    }
}
