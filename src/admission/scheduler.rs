//! Adaptive per-client pacing.
//!
//! # Responsibilities
//! - Maintain one virtual scheduling slot per client identity
//! - Convert a query's estimated cost into a delay in milliseconds
//! - Bound the slot map under client churn with a lazy sweep
//!
//! # Design Decisions
//! - Cost-weighted leaky bucket: the spacing between a client's requests
//!   scales with query expense (range width, facet count), so a client
//!   issuing few expensive queries is throttled like one issuing many cheap
//!   ones
//! - Time is injected as monotonic milliseconds; nothing here reads a clock,
//!   which keeps every pacing rule deterministic under test
//! - DashMap entry access serializes read-modify-write per client on the
//!   shard lock, so concurrent requests from one client cannot regress the
//!   slot; different clients land on different shards and do not contend

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::admission::analyzer::RiskProfile;
use crate::config::PacingConfig;
use crate::observability::metrics;

/// Seconds in a day; normalizes range width into the difficulty multiplier.
const RANGE_SCALE_SECS: f64 = 86_400.0;

/// Upper clamp on either difficulty multiplier.
const MAX_MULTIPLIER: f64 = 11.0;

/// Cost-weighted virtual-slot scheduler.
///
/// Each client's slot is the earliest virtual time its next request may
/// dispatch. A request arriving before its slot pushes the slot further out
/// and is told to wait; an idle client's stale slot resets to `now`.
pub struct PacingScheduler {
    /// Next eligible virtual time per client, in injected milliseconds.
    slots: DashMap<String, f64>,
    /// Nominal spacing between unit-cost requests, ms.
    base_interval_ms: f64,
    config: PacingConfig,
    calls: AtomicU64,
}

impl PacingScheduler {
    pub fn new(search_max_rps: f64, config: PacingConfig) -> Self {
        Self {
            slots: DashMap::new(),
            base_interval_ms: 1000.0 / search_max_rps,
            config,
            calls: AtomicU64::new(0),
        }
    }

    /// Compute the delay for one accepted request and advance the client's
    /// slot. Returns 0 when the client is idle or new.
    pub fn schedule(&self, client_id: &str, profile: &RiskProfile, now_ms: u64) -> u64 {
        self.maybe_sweep(now_ms);

        let interval = self.effective_interval(profile);
        let now = now_ms as f64;

        let mut slot = self
            .slots
            .entry(client_id.to_string())
            .or_insert(f64::NEG_INFINITY);

        if *slot < now {
            *slot = now + interval;
            return 0;
        }

        *slot += interval;
        (*slot - now).round() as u64
    }

    /// Scale the base interval by the query's difficulty multipliers.
    fn effective_interval(&self, profile: &RiskProfile) -> f64 {
        let mut interval = self.base_interval_ms;

        if let Some(range) = profile.max_range_secs {
            let k = (0.5 + range as f64 / RANGE_SCALE_SECS).min(MAX_MULTIPLIER);
            if k > 1.0 {
                interval *= k;
            }
        }
        if let Some(facets) = profile.facet_count {
            let k = (0.75 + facets as f64 / 4.0).min(MAX_MULTIPLIER);
            if k > 1.0 {
                interval *= k;
            }
        }
        interval
    }

    /// Every Nth call, drop entries whose slot has been in the past beyond
    /// the grace window. Keeps memory bounded under high client churn.
    fn maybe_sweep(&self, now_ms: u64) {
        let calls = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if calls % self.config.sweep_every_calls != 0 {
            return;
        }

        let horizon = now_ms as f64 - (self.config.idle_grace_secs * 1000) as f64;
        let before = self.slots.len();
        self.slots.retain(|_, slot| *slot >= horizon);
        let evicted = before - self.slots.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.slots.len(), "swept idle pacing slots");
        }
        metrics::record_tracked_clients(self.slots.len());
    }

    /// Number of clients currently holding a slot.
    pub fn tracked_clients(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(rps: f64) -> PacingScheduler {
        PacingScheduler::new(
            rps,
            PacingConfig {
                sweep_every_calls: 1_000_000,
                idle_grace_secs: 300,
            },
        )
    }

    fn unit_cost() -> RiskProfile {
        RiskProfile::default()
    }

    #[test]
    fn test_first_request_is_not_delayed() {
        let s = scheduler(2.0);
        assert_eq!(s.schedule("alice", &unit_cost(), 10_000), 0);
    }

    #[test]
    fn test_back_to_back_requests_accumulate_by_base_interval() {
        // 2 rps -> 500 ms base interval
        let s = scheduler(2.0);
        let now = 10_000;
        assert_eq!(s.schedule("alice", &unit_cost(), now), 0);

        let mut previous = s.schedule("alice", &unit_cost(), now);
        assert_eq!(previous, 1000);
        for _ in 0..5 {
            let delay = s.schedule("alice", &unit_cost(), now);
            assert_eq!(delay, previous + 500);
            previous = delay;
        }
    }

    #[test]
    fn test_idle_gap_resets_to_zero() {
        let s = scheduler(2.0);
        assert_eq!(s.schedule("alice", &unit_cost(), 10_000), 0);
        let delay = s.schedule("alice", &unit_cost(), 10_000);
        assert!(delay > 0);
        // Well past the accumulated slot.
        assert_eq!(s.schedule("alice", &unit_cost(), 100_000), 0);
    }

    #[test]
    fn test_slot_equal_to_now_still_accumulates() {
        let s = scheduler(1.0);
        assert_eq!(s.schedule("alice", &unit_cost(), 10_000), 0);
        // Slot now sits at 11_000; arriving exactly then advances, not resets.
        assert_eq!(s.schedule("alice", &unit_cost(), 11_000), 1000);
    }

    #[test]
    fn test_clients_do_not_share_slots() {
        let s = scheduler(2.0);
        assert_eq!(s.schedule("alice", &unit_cost(), 10_000), 0);
        assert!(s.schedule("alice", &unit_cost(), 10_000) > 0);
        assert_eq!(s.schedule("bob", &unit_cost(), 10_000), 0);
        assert_eq!(s.tracked_clients(), 2);
    }

    #[test]
    fn test_range_multiplier_scales_interval() {
        // 10 rps -> 100 ms base. A 12h range gives k = 0.5 + 0.5 = 1.0,
        // which is not applied; a 24h range gives k = 1.5.
        let s = scheduler(10.0);
        let half_day = RiskProfile {
            max_range_secs: Some(43_200),
            ..RiskProfile::default()
        };
        s.schedule("a", &half_day, 0);
        assert_eq!(s.schedule("a", &half_day, 0), 200);

        let full_day = RiskProfile {
            max_range_secs: Some(86_400),
            ..RiskProfile::default()
        };
        s.schedule("b", &full_day, 0);
        assert_eq!(s.schedule("b", &full_day, 0), 300);
    }

    #[test]
    fn test_range_multiplier_clamped_at_eleven() {
        let s = scheduler(10.0);
        let huge = RiskProfile {
            max_range_secs: Some(10_000_000),
            ..RiskProfile::default()
        };
        let absurd = RiskProfile {
            max_range_secs: Some(i64::MAX / 2),
            ..RiskProfile::default()
        };
        s.schedule("a", &huge, 0);
        let clamped = s.schedule("a", &huge, 0);
        assert_eq!(clamped, 2200); // 2 x (11 x 100ms)

        s.schedule("b", &absurd, 0);
        assert_eq!(s.schedule("b", &absurd, 0), clamped);
    }

    #[test]
    fn test_facet_multiplier_applied_above_one() {
        // k = 0.75 + facets/4: one facet gives exactly 1.0, not applied.
        let s = scheduler(10.0);
        let one_facet = RiskProfile {
            facet_count: Some(1),
            ..RiskProfile::default()
        };
        s.schedule("a", &one_facet, 0);
        assert_eq!(s.schedule("a", &one_facet, 0), 200);

        let five_facets = RiskProfile {
            facet_count: Some(5),
            ..RiskProfile::default()
        };
        s.schedule("b", &five_facets, 0);
        assert_eq!(s.schedule("b", &five_facets, 0), 400); // k = 2.0
    }

    #[test]
    fn test_multipliers_compound() {
        // base 100ms, k_range = 1.5 (24h), k_facet = 2.0 (5 facets) -> 300ms
        let s = scheduler(10.0);
        let costly = RiskProfile {
            max_range_secs: Some(86_400),
            facet_count: Some(5),
            ..RiskProfile::default()
        };
        s.schedule("a", &costly, 0);
        assert_eq!(s.schedule("a", &costly, 0), 600);
    }

    #[test]
    fn test_sweep_evicts_idle_clients_only() {
        let s = PacingScheduler::new(
            2.0,
            PacingConfig {
                sweep_every_calls: 4,
                idle_grace_secs: 1,
            },
        );
        // calls 1-2: idle-then-forgotten client.
        s.schedule("idle", &unit_cost(), 0);
        s.schedule("idle", &unit_cost(), 0);
        assert_eq!(s.tracked_clients(), 1);

        // calls 3-4: active client far in the future; call 4 sweeps.
        s.schedule("active", &unit_cost(), 100_000);
        s.schedule("active", &unit_cost(), 100_000);
        assert_eq!(s.tracked_clients(), 1);
        assert!(s.slots.contains_key("active"));
        assert!(!s.slots.contains_key("idle"));
    }
}
