//! Query structure analysis.
//!
//! # Responsibilities
//! - Parse the assembled body as JSON
//! - Walk every known location where a time-range filter can appear
//! - Count facets and scan term aggregations for forbidden fields / sizes
//! - Produce a [`RiskProfile`] of cost-relevant signals
//!
//! # Design Decisions
//! - The query document is untrusted and deeply optional: every lookup is
//!   tri-state (found / absent / malformed). Absent structure is silent;
//!   present-but-wrong-shape structure is skipped, logged at warn and
//!   counted on `RiskProfile::anomalies` so malformed queries stay auditable
//! - No anomaly ever aborts the analysis; a defect in one facet degrades
//!   precision of the profile, never availability
//! - Parse failure is the one hard error here and is surfaced to the
//!   orchestrator, which rejects the request

use serde_json::Value;

use crate::config::LimitsConfig;

/// Timestamp field a range filter is keyed on.
const RANGE_FIELD: &str = "@timestamp";

/// Path from a query root down to its must-list.
const FILTERED_MUST: [&str; 4] = ["filtered", "filter", "bool", "must"];

/// Derived summary of a query's cost-relevant structural properties.
///
/// Every signal is independently optional: `None` means the signal could not
/// be determined, which is distinct from a zero value and never treated as a
/// violation by itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskProfile {
    /// Widest time range found across all filter locations, whole seconds.
    pub max_range_secs: Option<i64>,
    /// Number of facet keys; `Some(0)` for an empty facets object, `None`
    /// when no facets object exists.
    pub facet_count: Option<u64>,
    /// First terms/terms_stats violation found, if any.
    pub term_violation: Option<String>,
    /// Present-but-malformed structures encountered while scanning.
    pub anomalies: u32,
}

/// Outcome of a single key lookup in the untrusted document.
enum Lookup<'a> {
    Found(&'a Value),
    Absent,
    Malformed,
}

fn member<'a>(value: &'a Value, key: &str) -> Lookup<'a> {
    match value {
        Value::Object(map) => match map.get(key) {
            Some(v) => Lookup::Found(v),
            None => Lookup::Absent,
        },
        _ => Lookup::Malformed,
    }
}

/// Follow a key path, distinguishing missing structure from wrong-shaped
/// structure. Missing is silent; wrong-shaped is counted and logged.
fn descend<'a>(root: &'a Value, path: &[&str], anomalies: &mut u32) -> Option<&'a Value> {
    let mut current = root;
    for key in path {
        match member(current, key) {
            Lookup::Found(next) => current = next,
            Lookup::Absent => return None,
            Lookup::Malformed => {
                *anomalies += 1;
                tracing::warn!(key = %key, "malformed structure while descending query");
                return None;
            }
        }
    }
    Some(current)
}

/// Analyze a request body, producing the risk profile.
///
/// Returns the JSON error when the body does not parse at all; the caller
/// treats that as a terminal rejection.
pub fn analyze(body: &[u8], limits: &LimitsConfig) -> Result<RiskProfile, serde_json::Error> {
    let document: Value = serde_json::from_slice(body)?;

    let mut profile = RiskProfile::default();
    let mut widths: Vec<i64> = Vec::new();

    // Top-level query filter.
    if let Some(must) = descend(&document, &query_must_path(), &mut profile.anomalies) {
        collect_range_widths(must, &mut widths, &mut profile.anomalies);
    }

    // Facets: count, per-facet filters, per-facet term aggregations.
    match member(&document, "facets") {
        Lookup::Found(facets) => match facets.as_object() {
            Some(map) => {
                profile.facet_count = Some(map.len() as u64);
                for (name, facet) in map {
                    scan_facet_ranges(facet, &mut widths, &mut profile.anomalies);
                    if profile.term_violation.is_none() {
                        profile.term_violation =
                            scan_facet_terms(name, facet, limits, &mut profile.anomalies);
                    }
                }
            }
            None => {
                profile.anomalies += 1;
                tracing::warn!("facets present but not an object");
            }
        },
        Lookup::Absent => {}
        Lookup::Malformed => {
            profile.anomalies += 1;
            tracing::warn!("query document root is not an object");
        }
    }

    profile.max_range_secs = widths.into_iter().max();

    if profile.anomalies > 0 {
        tracing::warn!(
            anomalies = profile.anomalies,
            "query contained malformed optional structure"
        );
    }
    Ok(profile)
}

fn query_must_path() -> Vec<&'static str> {
    let mut path = vec!["query"];
    path.extend_from_slice(&FILTERED_MUST);
    path
}

/// Both nested locations a facet can carry a filter in.
fn scan_facet_ranges(facet: &Value, widths: &mut Vec<i64>, anomalies: &mut u32) {
    let mut filter_path = vec!["facet_filter", "fquery", "query"];
    filter_path.extend_from_slice(&FILTERED_MUST);
    if let Some(must) = descend(facet, &filter_path, anomalies) {
        collect_range_widths(must, widths, anomalies);
    }

    if let Some(must) = descend(facet, &query_must_path(), anomalies) {
        collect_range_widths(must, widths, anomalies);
    }
}

/// Inspect each element of a must-list for a range condition on the
/// timestamp field; widths are collected in whole seconds.
fn collect_range_widths(must: &Value, widths: &mut Vec<i64>, anomalies: &mut u32) {
    let Some(elements) = must.as_array() else {
        *anomalies += 1;
        tracing::warn!("must clause present but not an array");
        return;
    };

    for element in elements {
        let range = match descend(element, &["range", RANGE_FIELD], anomalies) {
            Some(r) => r,
            None => continue,
        };
        let from = member(range, "from");
        let to = member(range, "to");
        match (from, to) {
            (Lookup::Found(from), Lookup::Found(to)) => {
                match (from.as_f64(), to.as_f64()) {
                    (Some(from_ms), Some(to_ms)) => {
                        widths.push(((to_ms - from_ms) / 1000.0).round() as i64);
                    }
                    _ => {
                        *anomalies += 1;
                        tracing::warn!("range bounds are not numeric");
                    }
                }
            }
            (Lookup::Malformed, _) | (_, Lookup::Malformed) => {
                *anomalies += 1;
                tracing::warn!("range condition is not an object");
            }
            _ => {}
        }
    }
}

/// Check one facet's terms / terms_stats aggregation against the limits.
///
/// A malformed term block degrades to "no violation for this facet" so one
/// broken facet cannot mask signals in the others.
fn scan_facet_terms(
    name: &str,
    facet: &Value,
    limits: &LimitsConfig,
    anomalies: &mut u32,
) -> Option<String> {
    let (field, size) = match member(facet, "terms") {
        Lookup::Found(terms) => (member(terms, "field"), member(terms, "size")),
        Lookup::Malformed => {
            *anomalies += 1;
            tracing::warn!(facet = name, "facet is not an object");
            return None;
        }
        Lookup::Absent => match member(facet, "terms_stats") {
            Lookup::Found(stats) => (member(stats, "key_field"), member(stats, "size")),
            _ => return None,
        },
    };

    let field = match field {
        Lookup::Found(Value::String(f)) => f.as_str(),
        Lookup::Found(_) | Lookup::Malformed => {
            *anomalies += 1;
            tracing::warn!(facet = name, "malformed terms aggregation");
            return None;
        }
        Lookup::Absent => return None,
    };

    // ".raw" is the not-analyzed sub-field alias; limits are declared
    // against the base field name.
    let field = field.strip_suffix(".raw").unwrap_or(field);

    if limits.terms_forbidden_fields.iter().any(|f| f == field) {
        return Some(format!("terms query forbidden for field: {}", field));
    }

    match size {
        Lookup::Found(size) => match size.as_f64() {
            Some(size) if size > limits.terms_max_size as f64 => Some(format!(
                "terms size exceeds maximum: {}",
                limits.terms_max_size
            )),
            Some(_) => None,
            None => {
                *anomalies += 1;
                tracing::warn!(facet = name, "terms size is not numeric");
                None
            }
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits() -> LimitsConfig {
        LimitsConfig {
            terms_forbidden_fields: vec!["host".into(), "session_id".into()],
            terms_max_size: 100,
            ..LimitsConfig::default()
        }
    }

    fn analyze_value(v: Value) -> RiskProfile {
        analyze(v.to_string().as_bytes(), &limits()).unwrap()
    }

    fn range_clause(from: i64, to: i64) -> Value {
        json!({ "range": { "@timestamp": { "from": from, "to": to } } })
    }

    #[test]
    fn test_unparsable_body_is_an_error() {
        assert!(analyze(b"{not json", &limits()).is_err());
    }

    #[test]
    fn test_empty_object_yields_all_signals_absent() {
        let profile = analyze_value(json!({}));
        assert_eq!(profile, RiskProfile::default());
    }

    #[test]
    fn test_top_level_range_width() {
        let profile = analyze_value(json!({
            "query": { "filtered": { "filter": { "bool": {
                "must": [range_clause(1000, 3_601_000)]
            }}}}
        }));
        assert_eq!(profile.max_range_secs, Some(3600));
        assert_eq!(profile.facet_count, None);
        assert_eq!(profile.anomalies, 0);
    }

    #[test]
    fn test_max_of_multiple_ranges_not_sum_or_first() {
        let profile = analyze_value(json!({
            "query": { "filtered": { "filter": { "bool": {
                "must": [range_clause(0, 100_000), range_clause(0, 500_000)]
            }}}}
        }));
        assert_eq!(profile.max_range_secs, Some(500));
    }

    #[test]
    fn test_range_inside_facet_filter() {
        let profile = analyze_value(json!({
            "facets": { "by_host": {
                "facet_filter": { "fquery": { "query": { "filtered": { "filter": { "bool": {
                    "must": [range_clause(0, 7_200_000)]
                }}}}}}
            }}
        }));
        assert_eq!(profile.max_range_secs, Some(7200));
        assert_eq!(profile.facet_count, Some(1));
    }

    #[test]
    fn test_range_inside_facet_query() {
        let profile = analyze_value(json!({
            "facets": { "timeline": {
                "query": { "filtered": { "filter": { "bool": {
                    "must": [range_clause(0, 60_000)]
                }}}}
            }}
        }));
        assert_eq!(profile.max_range_secs, Some(60));
    }

    #[test]
    fn test_widest_range_wins_across_locations() {
        let profile = analyze_value(json!({
            "query": { "filtered": { "filter": { "bool": {
                "must": [range_clause(0, 50_000)]
            }}}},
            "facets": { "f": {
                "query": { "filtered": { "filter": { "bool": {
                    "must": [range_clause(0, 90_000)]
                }}}}
            }}
        }));
        assert_eq!(profile.max_range_secs, Some(90));
    }

    #[test]
    fn test_width_rounds_to_nearest_second() {
        let profile = analyze_value(json!({
            "query": { "filtered": { "filter": { "bool": {
                "must": [range_clause(0, 1499)]
            }}}}
        }));
        assert_eq!(profile.max_range_secs, Some(1));
    }

    #[test]
    fn test_empty_facets_object_counts_zero() {
        let profile = analyze_value(json!({ "facets": {} }));
        assert_eq!(profile.facet_count, Some(0));
    }

    #[test]
    fn test_missing_facets_is_absent_not_zero() {
        let profile = analyze_value(json!({ "query": {} }));
        assert_eq!(profile.facet_count, None);
    }

    #[test]
    fn test_forbidden_field_with_raw_suffix_stripped() {
        let profile = analyze_value(json!({
            "facets": { "hosts": { "terms": { "field": "host.raw", "size": 10 } } }
        }));
        let violation = profile.term_violation.unwrap();
        assert!(violation.contains("host"), "got: {}", violation);
        assert!(!violation.contains(".raw"));
    }

    #[test]
    fn test_terms_stats_key_field_checked() {
        let profile = analyze_value(json!({
            "facets": { "stats": {
                "terms_stats": { "key_field": "session_id", "value_field": "bytes", "size": 5 }
            }}
        }));
        assert!(profile.term_violation.unwrap().contains("session_id"));
    }

    #[test]
    fn test_term_size_boundary_is_inclusive() {
        let at_limit = analyze_value(json!({
            "facets": { "f": { "terms": { "field": "status", "size": 100 } } }
        }));
        assert_eq!(at_limit.term_violation, None);

        let over_limit = analyze_value(json!({
            "facets": { "f": { "terms": { "field": "status", "size": 150 } } }
        }));
        assert!(over_limit.term_violation.unwrap().contains("100"));
    }

    #[test]
    fn test_first_violation_wins() {
        let profile = analyze_value(json!({
            "facets": {
                "a": { "terms": { "field": "host", "size": 1 } },
                "b": { "terms": { "field": "status", "size": 9999 } }
            }
        }));
        // Facets scan in key order; the forbidden field in "a" is reported.
        assert!(profile.term_violation.unwrap().contains("host"));
    }

    #[test]
    fn test_malformed_must_is_counted_not_fatal() {
        let profile = analyze_value(json!({
            "query": { "filtered": { "filter": { "bool": { "must": "bogus" }}}},
            "facets": { "f": { "terms": { "field": "status", "size": 10 } } }
        }));
        assert_eq!(profile.max_range_secs, None);
        assert_eq!(profile.facet_count, Some(1));
        assert!(profile.anomalies > 0);
    }

    #[test]
    fn test_malformed_facet_does_not_mask_other_facets() {
        let profile = analyze_value(json!({
            "facets": {
                "broken": { "terms": "not an object" },
                "hosts": { "terms": { "field": "host", "size": 1 } }
            }
        }));
        assert!(profile.term_violation.unwrap().contains("host"));
        assert!(profile.anomalies > 0);
    }

    #[test]
    fn test_facets_wrong_shape_is_anomaly_with_absent_count() {
        let profile = analyze_value(json!({ "facets": [1, 2, 3] }));
        assert_eq!(profile.facet_count, None);
        assert_eq!(profile.anomalies, 1);
    }

    #[test]
    fn test_non_numeric_range_bounds_are_anomalies() {
        let profile = analyze_value(json!({
            "query": { "filtered": { "filter": { "bool": {
                "must": [{ "range": { "@timestamp": { "from": "dawn", "to": "dusk" } } }]
            }}}}
        }));
        assert_eq!(profile.max_range_secs, None);
        assert_eq!(profile.anomalies, 1);
    }

    #[test]
    fn test_scalar_root_yields_absent_signals() {
        let profile = analyze(b"42", &limits()).unwrap();
        assert_eq!(profile.facet_count, None);
        assert_eq!(profile.max_range_secs, None);
    }
}
