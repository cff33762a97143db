//! Policy validation of a risk profile.
//!
//! # Responsibilities
//! - Apply the configured limits to an extracted [`RiskProfile`]
//! - Return the first violation, in a fixed check order
//!
//! # Design Decisions
//! - Pure function over profile and limits: no side effects, deterministic,
//!   trivially unit-testable
//! - Absent signals never violate anything; only a determined value can
//!   exceed a limit
//! - The combined facet/range check couples the two cost axes so neither
//!   can be gamed alone: many facets are allowed only with a proportionally
//!   narrow time range

use crate::admission::analyzer::RiskProfile;
use crate::config::LimitsConfig;

/// Validate a profile against the limits; `Err` carries the reason for the
/// first check that failed.
pub fn validate(profile: &RiskProfile, limits: &LimitsConfig) -> Result<(), String> {
    if let Some(range) = profile.max_range_secs {
        if range > limits.search_max_range_secs {
            return Err(format!(
                "search interval range exceeds limit: {}",
                limits.search_max_range_secs
            ));
        }
    }

    if let Some(facets) = profile.facet_count {
        if facets > limits.search_max_facets {
            return Err(format!(
                "facets count exceeds maximum: {}",
                limits.search_max_facets
            ));
        }
    }

    // Coupled budget: facet count must stay under max_range / actual_range.
    // Gated on both signals present and nonzero; a zero-width range never
    // divides and is already the cheapest query of any facet count.
    if let (Some(facets), Some(range)) = (profile.facet_count, profile.max_range_secs) {
        if facets > 0 && range != 0 {
            let factor = round2(limits.search_max_range_secs as f64 / range as f64);
            if facets as f64 > factor {
                return Err(format!(
                    "facets count/search range factor exceeded: {}:{:.2}:{}:{}",
                    facets, factor, limits.search_max_range_secs, range
                ));
            }
        }
    }

    if let Some(reason) = &profile.term_violation {
        return Err(reason.clone());
    }

    Ok(())
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
