//! Evaluates a [`FilterNode`] tree against a [`PayloadIndex`] into a
//! concrete allow/deny bitmap.
//!
//! Grounded on the teacher's `HnswIndex::search`'s inline `apply_mask`
//! ascending-size intersection; generalized into the full recursive
//! boolean algebra so `NOT` never needs to materialize the whole id
//! universe: `AND`/`OR` combine `Allow`/`Deny` operands via the identities
//! below instead of complementing against a known-ids set.

use std::ops::Bound;

use roaring::RoaringBitmap;
use vectordb_core::filter::{FilterNode, FilterValue};

use crate::payload_index::PayloadIndex;

/// `None` (non-numeric `value`) falls back to the empty set rather than a
/// panic — a malformed filter should match nothing, not crash the query.
fn bound_bitmap(idx: &PayloadIndex, key: &str, value: &FilterValue, exclusive: bool, ascending: bool) -> RoaringBitmap {
    let Some(v) = value.as_f64() else {
        return RoaringBitmap::new();
    };
    let bound = if exclusive { Bound::Excluded(v) } else { Bound::Included(v) };
    if ascending {
        idx.numeric_bound_bitmap(key, bound, Bound::Unbounded)
    } else {
        idx.numeric_bound_bitmap(key, Bound::Unbounded, bound)
    }
}

#[derive(Debug, Clone)]
pub enum PlannedFilter {
    /// Passes iff the id is a member.
    Allow(RoaringBitmap),
    /// Passes iff the id is NOT a member.
    Deny(RoaringBitmap),
}

impl PlannedFilter {
    pub fn test(&self, id: u32) -> bool {
        match self {
            PlannedFilter::Allow(b) => b.contains(id),
            PlannedFilter::Deny(b) => !b.contains(id),
        }
    }

    /// Cardinality of the concrete member set, used as a selectivity proxy
    /// by the query planner (smaller `Allow`/larger `Deny` = more selective).
    pub fn member_count(&self) -> u64 {
        match self {
            PlannedFilter::Allow(b) | PlannedFilter::Deny(b) => b.len(),
        }
    }

    pub fn selectivity(&self, total: usize) -> f64 {
        if total == 0 {
            return 1.0;
        }
        match self {
            PlannedFilter::Allow(b) => b.len() as f64 / total as f64,
            PlannedFilter::Deny(b) => 1.0 - (b.len() as f64 / total as f64),
        }
    }

    /// Materialize as a concrete bitmap of passing ids, bounded by
    /// `universe` for the `Deny` case (used only by the filter-first path,
    /// which already has a concrete candidate set to subtract against).
    pub fn materialize(&self, universe: &RoaringBitmap) -> RoaringBitmap {
        match self {
            PlannedFilter::Allow(b) => b & universe,
            PlannedFilter::Deny(b) => universe - b,
        }
    }
}

fn and2(a: PlannedFilter, b: PlannedFilter) -> PlannedFilter {
    use PlannedFilter::{Allow, Deny};
    match (a, b) {
        (Allow(x), Allow(y)) => Allow(x & y),
        (Allow(x), Deny(y)) => Allow(x - y),
        (Deny(x), Allow(y)) => Allow(y - x),
        (Deny(x), Deny(y)) => Deny(x | y),
    }
}

fn or2(a: PlannedFilter, b: PlannedFilter) -> PlannedFilter {
    use PlannedFilter::{Allow, Deny};
    match (a, b) {
        (Allow(x), Allow(y)) => Allow(x | y),
        (Allow(x), Deny(y)) => Deny(y - x),
        (Deny(x), Allow(y)) => Deny(x - y),
        (Deny(x), Deny(y)) => Deny(x & y),
    }
}

pub fn plan(node: &FilterNode, idx: &PayloadIndex, total: usize) -> PlannedFilter {
    match node {
        FilterNode::Eq { key, value } => PlannedFilter::Allow(idx.eq_bitmap(key, value)),
        FilterNode::Ne { key, value } => PlannedFilter::Deny(idx.eq_bitmap(key, value)),
        FilterNode::Gt { key, value } => PlannedFilter::Allow(bound_bitmap(idx, key, value, true, true)),
        FilterNode::Gte { key, value } => PlannedFilter::Allow(bound_bitmap(idx, key, value, false, true)),
        FilterNode::Lt { key, value } => PlannedFilter::Allow(bound_bitmap(idx, key, value, true, false)),
        FilterNode::Lte { key, value } => PlannedFilter::Allow(bound_bitmap(idx, key, value, false, false)),
        FilterNode::Range { key, gte, lte } => {
            let gte = gte.as_ref().and_then(FilterValue::as_f64);
            let lte = lte.as_ref().and_then(FilterValue::as_f64);
            PlannedFilter::Allow(idx.range_bitmap(key, gte, lte))
        }
        FilterNode::In { key, values } => {
            let mut acc = RoaringBitmap::new();
            for v in values {
                acc |= idx.eq_bitmap(key, v);
            }
            PlannedFilter::Allow(acc)
        }
        FilterNode::NotIn { key, values } => {
            let mut acc = RoaringBitmap::new();
            for v in values {
                acc |= idx.eq_bitmap(key, v);
            }
            PlannedFilter::Deny(acc)
        }
        FilterNode::GeoRadius { key, lat, lon, radius_m } => {
            PlannedFilter::Allow(idx.geo_radius_bitmap(key, *lat, *lon, *radius_m))
        }
        FilterNode::GeoBbox { key, min_lat, min_lon, max_lat, max_lon } => {
            PlannedFilter::Allow(idx.geo_bbox_bitmap(key, *min_lat, *min_lon, *max_lat, *max_lon))
        }
        FilterNode::MatchText { key, text } => PlannedFilter::Allow(idx.match_text_bitmap(key, text)),
        FilterNode::MatchPhrase { key, phrase } => PlannedFilter::Allow(idx.match_phrase_bitmap(key, phrase)),
        FilterNode::And(children) => {
            let mut plans: Vec<PlannedFilter> = children.iter().map(|c| plan(c, idx, total)).collect();
            // Ascending member-count first so the cheapest intersection runs first,
            // mirroring the teacher's ascending-size `apply_mask` ordering.
            plans.sort_by_key(PlannedFilter::member_count);
            plans
                .into_iter()
                .reduce(and2)
                .unwrap_or(PlannedFilter::Allow(RoaringBitmap::new()))
        }
        FilterNode::Or(children) => {
            let plans: Vec<PlannedFilter> = children.iter().map(|c| plan(c, idx, total)).collect();
            plans
                .into_iter()
                .reduce(or2)
                .unwrap_or(PlannedFilter::Allow(RoaringBitmap::new()))
        }
        FilterNode::Not(inner) => match plan(inner, idx, total) {
            PlannedFilter::Allow(b) => PlannedFilter::Deny(b),
            PlannedFilter::Deny(b) => PlannedFilter::Allow(b),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use vectordb_core::filter::FilterValue;

    fn sample_index() -> PayloadIndex {
        let idx = PayloadIndex::new();
        let mut m1 = HashMap::new();
        m1.insert("status".to_string(), FilterValue::Str("live".into()));
        m1.insert("age".to_string(), FilterValue::Int(30));
        idx.index(1, &m1);

        let mut m2 = HashMap::new();
        m2.insert("status".to_string(), FilterValue::Str("dead".into()));
        m2.insert("age".to_string(), FilterValue::Int(40));
        idx.index(2, &m2);

        let mut m3 = HashMap::new();
        m3.insert("status".to_string(), FilterValue::Str("live".into()));
        m3.insert("age".to_string(), FilterValue::Int(50));
        idx.index(3, &m3);
        idx
    }

    #[test]
    fn and_intersects() {
        let idx = sample_index();
        let tree = FilterNode::and(vec![
            FilterNode::Eq { key: "status".into(), value: FilterValue::Str("live".into()) },
            FilterNode::Gte { key: "age".into(), value: FilterValue::Int(40) },
        ]);
        let planned = plan(&tree, &idx, 3);
        assert!(matches!(&planned, PlannedFilter::Allow(_)));
        assert!(planned.test(3));
        assert!(!planned.test(1));
        assert!(!planned.test(2));
    }

    #[test]
    fn not_denies_without_materializing_universe() {
        let idx = sample_index();
        let tree = FilterNode::not(FilterNode::Eq { key: "status".into(), value: FilterValue::Str("live".into()) });
        let planned = plan(&tree, &idx, 3);
        assert!(matches!(&planned, PlannedFilter::Deny(_)));
        assert!(!planned.test(1));
        assert!(planned.test(2));
    }

    #[test]
    fn or_of_allow_and_not() {
        let idx = sample_index();
        let tree = FilterNode::or(vec![
            FilterNode::Eq { key: "status".into(), value: FilterValue::Str("dead".into()) },
            FilterNode::not(FilterNode::Gte { key: "age".into(), value: FilterValue::Int(40) }),
        ]);
        let planned = plan(&tree, &idx, 3);
        assert!(planned.test(1)); // age 30 < 40
        assert!(planned.test(2)); // status dead
        assert!(!planned.test(3)); // age 50, status live
    }
}
