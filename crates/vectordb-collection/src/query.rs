//! Query planner and scatter/gather merge.
//!
//! Grounded on `HnswIndex::{search, search_hybrid}`'s three-way branch
//! (plain vector search / filtered vector search / RRF hybrid), generalized
//! into the selectivity-threshold planner: filter-first below `S_LO`,
//! vector-first above `S_HI`, hybrid in between with a filter-first
//! fallback if the hybrid pass under-fills `k`. Scatter/gather across shards
//! reuses the teacher's `search_hybrid` final merge-and-sort idiom.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;

use roaring::RoaringBitmap;

use vectordb_core::{CancellationToken, DenseVector, SearchHit, SearchParams};
use vectordb_index::{filter_engine, HnswIndex, NodeId, PayloadIndex};

/// Below this selectivity the posting list is cheap enough to score
/// directly; no graph traversal needed.
pub const DEFAULT_S_LO: f64 = 0.01;
/// Above this selectivity the filter barely prunes anything; plain HNSW
/// search with an in-loop predicate check is cheaper than materializing a
/// near-universe bitmap.
pub const DEFAULT_S_HI: f64 = 0.50;
/// `ef_search` enlargement factor for the vector-first path, compensating
/// for candidates the predicate will reject.
pub const DEFAULT_ALPHA: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanChoice {
    FilterFirst,
    VectorFirst,
    Hybrid,
}

pub fn choose_plan(selectivity: f64) -> PlanChoice {
    if selectivity < DEFAULT_S_LO {
        PlanChoice::FilterFirst
    } else if selectivity > DEFAULT_S_HI {
        PlanChoice::VectorFirst
    } else {
        PlanChoice::Hybrid
    }
}

fn default_ef_search(index: &HnswIndex) -> usize {
    index.max_layer().max(1) as usize * 16 + 16
}

fn all_ids_bitmap(total: usize) -> RoaringBitmap {
    let mut b = RoaringBitmap::new();
    if total > 0 {
        b.insert_range(0..(total as u32));
    }
    b
}

/// Runs the local (per-shard) plan against one collection's HNSW graph and
/// payload index, returning `(internal_id, distance)` pairs.
pub fn plan_and_search(
    index: &HnswIndex,
    payload_index: &PayloadIndex,
    query: &DenseVector,
    params: &SearchParams,
    total: usize,
    cancel: &CancellationToken,
) -> Vec<(NodeId, f32)> {
    let ef_search = params.ef_search.unwrap_or_else(|| default_ef_search(index));
    let k = params.top_k;

    let Some(filter) = &params.filter else {
        return index.search(query, k, ef_search, None, cancel);
    };

    let planned = filter_engine::plan(filter, payload_index, total);
    let selectivity = planned.selectivity(total);

    match choose_plan(selectivity) {
        PlanChoice::FilterFirst => {
            let universe = planned.materialize(&all_ids_bitmap(total));
            index.score_candidates(universe.iter(), query, k)
        }
        PlanChoice::VectorFirst => {
            let enlarged = (ef_search as f64 * (1.0 + DEFAULT_ALPHA * (1.0 - selectivity))).round() as usize;
            index.search(query, k, enlarged.max(ef_search), Some(&planned), cancel)
        }
        PlanChoice::Hybrid => {
            let results = index.search(query, k, ef_search, Some(&planned), cancel);
            if results.len() < k {
                let universe = planned.materialize(&all_ids_bitmap(total));
                index.score_candidates(universe.iter(), query, k)
            } else {
                results
            }
        }
    }
}

/// Merges partial per-shard result lists by distance, deduplicating
/// external ids and keeping the smallest distance seen for each, then
/// truncates to `k` — spec §4.9 step 3.
pub fn merge_shard_results(per_shard: Vec<Vec<SearchHit>>, k: usize) -> Vec<SearchHit> {
    let mut best: HashMap<String, SearchHit> = HashMap::new();
    for hits in per_shard {
        for hit in hits {
            best.entry(hit.external_id.clone())
                .and_modify(|existing| {
                    if hit.distance < existing.distance {
                        *existing = hit.clone();
                    }
                })
                .or_insert(hit);
        }
    }
    let mut merged: Vec<SearchHit> = best.into_values().collect();
    merged.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(CmpOrdering::Equal));
    merged.truncate(k);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectivity_below_lo_chooses_filter_first() {
        assert_eq!(choose_plan(0.001), PlanChoice::FilterFirst);
    }

    #[test]
    fn selectivity_above_hi_chooses_vector_first() {
        assert_eq!(choose_plan(0.9), PlanChoice::VectorFirst);
    }

    #[test]
    fn mid_selectivity_chooses_hybrid() {
        assert_eq!(choose_plan(0.2), PlanChoice::Hybrid);
    }

    #[test]
    fn merge_keeps_smallest_distance_per_external_id() {
        let shard_a = vec![SearchHit { external_id: "x".into(), distance: 0.5, payload: None }];
        let shard_b = vec![SearchHit { external_id: "x".into(), distance: 0.1, payload: None }];
        let merged = merge_shard_results(vec![shard_a, shard_b], 10);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].distance - 0.1).abs() < 1e-9);
    }

    #[test]
    fn merge_truncates_to_k() {
        let shard = vec![
            SearchHit { external_id: "a".into(), distance: 0.1, payload: None },
            SearchHit { external_id: "b".into(), distance: 0.2, payload: None },
            SearchHit { external_id: "c".into(), distance: 0.3, payload: None },
        ];
        let merged = merge_shard_results(vec![shard], 2);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].external_id, "a");
    }
}
