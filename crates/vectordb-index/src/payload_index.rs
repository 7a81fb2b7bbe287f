//! Payload index: keyword/inverted, ordered-numeric, geo, and text-phrase
//! postings over a collection's metadata. Grounded on
//! `hyperspace_index::MetadataIndex` (`DashMap<String, RoaringBitmap>` for
//! inverted postings, `DashMap<String, BTreeMap<i64, RoaringBitmap>>` for
//! ordered numeric ranges), extended with a geo-cell index and a
//! term-position table so `match_phrase` can verify adjacency.

use dashmap::DashMap;
use ordered_float::OrderedFloat;
use roaring::RoaringBitmap;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::ops::Bound;

use vectordb_core::filter::FilterValue;

/// Cell width in degrees for the geo index: small enough that a radius query
/// only needs to scan a handful of neighboring cells for city-scale radii.
const GEO_CELL_SIZE: f64 = 0.01;

fn geo_cell(lat: f64, lon: f64) -> (i64, i64) {
    (
        (lat / GEO_CELL_SIZE).floor() as i64,
        (lon / GEO_CELL_SIZE).floor() as i64,
    )
}

fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const R: f64 = 6_371_000.0;
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * R * a.sqrt().asin()
}

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(str::to_lowercase)
        .map(|s| s.chars().filter(|c| c.is_alphanumeric()).collect())
        .filter(|s: &String| !s.is_empty())
        .collect()
}

#[derive(Debug, Clone)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Default)]
pub struct PayloadIndex {
    /// `"key:value"` -> postings, for exact-match keyword fields.
    pub inverted: DashMap<String, RoaringBitmap>,
    /// field -> (numeric value -> postings), for range queries. Holds both
    /// `Int` and `Float` payload values, the latter cast losslessly enough
    /// for range comparison since `OrderedFloat` gives `f64` a total order.
    pub numeric: DashMap<String, BTreeMap<OrderedFloat<f64>, RoaringBitmap>>,
    /// field -> (geo cell -> postings).
    pub geo: DashMap<String, HashMap<(i64, i64), RoaringBitmap>>,
    /// raw geo point per (field, handle), needed to re-check exact radius
    /// after the cell-granularity candidate scan.
    pub geo_points: DashMap<(String, u32), GeoPoint>,
    /// `"_txt:<field>:<token>"` -> postings, term-set search.
    pub text_postings: DashMap<String, RoaringBitmap>,
    /// (field, handle) -> token positions, for phrase adjacency checks.
    pub text_positions: DashMap<(String, u32), SmallVec<[(String, u32); 8]>>,
    /// Forward store: handle -> field map, for result hydration and
    /// re-indexing metadata after an update.
    pub forward: DashMap<u32, HashMap<String, String>>,
}

impl PayloadIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self, id: u32, fields: &HashMap<String, FilterValue>) {
        for (key, value) in fields {
            match value {
                FilterValue::Str(s) => {
                    let tag = format!("{key}:{s}");
                    self.inverted.entry(tag).or_default().insert(id);
                    for token in tokenize(s) {
                        let token_key = format!("_txt:{key}:{token}");
                        self.text_postings.entry(token_key).or_default().insert(id);
                    }
                    let positions: SmallVec<[(String, u32); 8]> = tokenize(s)
                        .into_iter()
                        .enumerate()
                        .map(|(pos, tok)| (tok, pos as u32))
                        .collect();
                    if !positions.is_empty() {
                        self.text_positions.insert((key.clone(), id), positions);
                    }
                }
                FilterValue::Int(n) => {
                    self.numeric.entry(key.clone()).or_default().entry(OrderedFloat(*n as f64)).or_default().insert(id);
                    let tag = format!("{key}:{n}");
                    self.inverted.entry(tag).or_default().insert(id);
                }
                FilterValue::Float(f) => {
                    self.numeric.entry(key.clone()).or_default().entry(OrderedFloat(*f)).or_default().insert(id);
                    let tag = format!("{key}:{value:?}");
                    self.inverted.entry(tag).or_default().insert(id);
                }
                FilterValue::Bool(b) => {
                    let tag = format!("{key}:{b}");
                    self.inverted.entry(tag).or_default().insert(id);
                }
                FilterValue::Geo { lat, lon } => {
                    self.index_geo(key, id, GeoPoint { lat: *lat, lon: *lon });
                }
            }
        }

        let mut forward: HashMap<String, String> = HashMap::new();
        for (k, v) in fields {
            forward.insert(k.clone(), format!("{v:?}"));
        }
        self.forward.insert(id, forward);
    }

    pub fn index_geo(&self, field: &str, id: u32, point: GeoPoint) {
        let cell = geo_cell(point.lat, point.lon);
        self.geo
            .entry(field.to_string())
            .or_default()
            .entry(cell)
            .or_default()
            .insert(id);
        self.geo_points.insert((field.to_string(), id), point);
    }

    pub fn eq_bitmap(&self, key: &str, value: &FilterValue) -> RoaringBitmap {
        let tag = format!("{key}:{}", display_value(value));
        self.inverted.get(&tag).map(|b| b.clone()).unwrap_or_default()
    }

    /// Inclusive-both-ends range lookup, used by `FilterNode::Range`.
    pub fn range_bitmap(&self, key: &str, gte: Option<f64>, lte: Option<f64>) -> RoaringBitmap {
        self.numeric_bound_bitmap(
            key,
            gte.map_or(Bound::Unbounded, Bound::Included),
            lte.map_or(Bound::Unbounded, Bound::Included),
        )
    }

    /// General bound lookup backing `Gt`/`Gte`/`Lt`/`Lte`/`Range`, so a
    /// strict bound doesn't need the integer off-by-one trick to express
    /// (which breaks once the field can hold float values).
    pub fn numeric_bound_bitmap(&self, key: &str, lower: Bound<f64>, upper: Bound<f64>) -> RoaringBitmap {
        let mut out = RoaringBitmap::new();
        if let Some(tree) = self.numeric.get(key) {
            let lo = map_bound(lower);
            let hi = map_bound(upper);
            for (_, bm) in tree.range((lo, hi)) {
                out |= bm;
            }
        }
        out
    }

    pub fn match_text_bitmap(&self, key: &str, text: &str) -> RoaringBitmap {
        let mut out: Option<RoaringBitmap> = None;
        for token in tokenize(text) {
            let tk = format!("_txt:{key}:{token}");
            let postings = self.text_postings.get(&tk).map(|b| b.clone()).unwrap_or_default();
            out = Some(match out {
                Some(acc) => acc | postings,
                None => postings,
            });
        }
        out.unwrap_or_default()
    }

    pub fn match_phrase_bitmap(&self, key: &str, phrase: &str) -> RoaringBitmap {
        let tokens = tokenize(phrase);
        if tokens.is_empty() {
            return RoaringBitmap::new();
        }
        let candidate_sets: Option<RoaringBitmap> = tokens.iter().fold(None, |acc, tok| {
            let tk = format!("_txt:{key}:{tok}");
            let postings = self.text_postings.get(&tk).map(|b| b.clone()).unwrap_or_default();
            Some(match acc {
                Some(a) => a & postings,
                None => postings,
            })
        });
        let Some(candidates) = candidate_sets else {
            return RoaringBitmap::new();
        };

        let mut out = RoaringBitmap::new();
        for id in candidates {
            if let Some(positions) = self.text_positions.get(&(key.to_string(), id)) {
                if has_contiguous_run(&positions, &tokens) {
                    out.insert(id);
                }
            }
        }
        out
    }

    pub fn geo_radius_bitmap(&self, key: &str, lat: f64, lon: f64, radius_m: f64) -> RoaringBitmap {
        let mut out = RoaringBitmap::new();
        let Some(cells) = self.geo.get(key) else {
            return out;
        };
        // Radius in cells, rounded up; scan the surrounding block of cells.
        let cell_span_deg = radius_m / 111_000.0 + GEO_CELL_SIZE;
        let span_cells = (cell_span_deg / GEO_CELL_SIZE).ceil() as i64 + 1;
        let (clat, clon) = geo_cell(lat, lon);
        for dlat in -span_cells..=span_cells {
            for dlon in -span_cells..=span_cells {
                if let Some(bm) = cells.get(&(clat + dlat, clon + dlon)) {
                    for id in bm {
                        if let Some(p) = self.geo_points.get(&(key.to_string(), id)) {
                            if haversine_m(lat, lon, p.lat, p.lon) <= radius_m {
                                out.insert(id);
                            }
                        }
                    }
                }
            }
        }
        out
    }

    pub fn geo_bbox_bitmap(&self, key: &str, min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> RoaringBitmap {
        let mut out = RoaringBitmap::new();
        let Some(cells) = self.geo.get(key) else {
            return out;
        };
        let (c0lat, c0lon) = geo_cell(min_lat, min_lon);
        let (c1lat, c1lon) = geo_cell(max_lat, max_lon);
        for clat in c0lat..=c1lat {
            for clon in c0lon..=c1lon {
                if let Some(bm) = cells.get(&(clat, clon)) {
                    for id in bm {
                        if let Some(p) = self.geo_points.get(&(key.to_string(), id)) {
                            let lat_ok = p.lat >= min_lat && p.lat <= max_lat;
                            let lon_ok = p.lon >= min_lon && p.lon <= max_lon;
                            if lat_ok && lon_ok {
                                out.insert(id);
                            }
                        }
                    }
                }
            }
        }
        out
    }

    /// Rough selectivity estimate in `[0, 1]` for the query planner: the
    /// fraction of `total` ids this key/value combination is expected to
    /// match, used to choose between filter-first and vector-first search.
    pub fn estimate_selectivity(&self, key: &str, total: usize) -> f64 {
        if total == 0 {
            return 1.0;
        }
        if let Some(tree) = self.numeric.get(key) {
            let count: u64 = tree.values().map(roaring::RoaringBitmap::len).sum();
            return count as f64 / total as f64;
        }
        let matches = self
            .inverted
            .iter()
            .filter(|e| e.key().starts_with(&format!("{key}:")))
            .map(|e| e.value().len())
            .sum::<u64>();
        (matches as f64 / total as f64).min(1.0)
    }

    pub fn remove(&self, id: u32) {
        self.forward.remove(&id);
        for mut entry in self.inverted.iter_mut() {
            entry.value_mut().remove(id);
        }
        for mut entry in self.numeric.iter_mut() {
            for bm in entry.value_mut().values_mut() {
                bm.remove(id);
            }
        }
        for mut entry in self.text_postings.iter_mut() {
            entry.value_mut().remove(id);
        }
        for mut entry in self.geo.iter_mut() {
            for bm in entry.value_mut().values_mut() {
                bm.remove(id);
            }
        }
        self.geo_points.retain(|(_, pid), _| *pid != id);
        self.text_positions.retain(|(_, pid), _| *pid != id);
    }
}

fn display_value(v: &FilterValue) -> String {
    match v {
        FilterValue::Str(s) => s.clone(),
        FilterValue::Int(n) => n.to_string(),
        FilterValue::Float(f) => format!("{f:?}"),
        FilterValue::Bool(b) => b.to_string(),
        FilterValue::Geo { lat, lon } => format!("{lat:?},{lon:?}"),
    }
}

fn map_bound(b: Bound<f64>) -> Bound<OrderedFloat<f64>> {
    match b {
        Bound::Included(v) => Bound::Included(OrderedFloat(v)),
        Bound::Excluded(v) => Bound::Excluded(OrderedFloat(v)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn has_contiguous_run(positions: &[(String, u32)], phrase_tokens: &[String]) -> bool {
    for window_start in positions.iter().filter(|(t, _)| *t == phrase_tokens[0]) {
        let base = window_start.1;
        let mut ok = true;
        for (offset, tok) in phrase_tokens.iter().enumerate() {
            let wanted_pos = base + offset as u32;
            if !positions.iter().any(|(t, p)| t == tok && *p == wanted_pos) {
                ok = false;
                break;
            }
        }
        if ok {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, FilterValue)]) -> HashMap<String, FilterValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn eq_and_range_lookup() {
        let idx = PayloadIndex::new();
        idx.index(1, &fields(&[("status", FilterValue::Str("live".into())), ("age", FilterValue::Int(30))]));
        idx.index(2, &fields(&[("status", FilterValue::Str("dead".into())), ("age", FilterValue::Int(40))]));

        let eq = idx.eq_bitmap("status", &FilterValue::Str("live".into()));
        assert!(eq.contains(1) && !eq.contains(2));

        let range = idx.range_bitmap("age", Some(35.0), None);
        assert!(!range.contains(1) && range.contains(2));
    }

    #[test]
    fn float_field_supports_exclusive_bounds() {
        let idx = PayloadIndex::new();
        idx.index(1, &fields(&[("price", FilterValue::Float(9.99))]));
        idx.index(2, &fields(&[("price", FilterValue::Float(10.0))]));

        let strictly_above = idx.numeric_bound_bitmap("price", Bound::Excluded(9.99), Bound::Unbounded);
        assert!(!strictly_above.contains(1) && strictly_above.contains(2));

        let at_or_above = idx.numeric_bound_bitmap("price", Bound::Included(9.99), Bound::Unbounded);
        assert!(at_or_above.contains(1) && at_or_above.contains(2));
    }

    #[test]
    fn geo_field_indexed_through_index() {
        let idx = PayloadIndex::new();
        idx.index(1, &fields(&[("loc", FilterValue::Geo { lat: 40.7128, lon: -74.0060 })]));

        let near_nyc = idx.geo_radius_bitmap("loc", 40.71, -74.00, 10_000.0);
        assert!(near_nyc.contains(1));

        idx.remove(1);
        let after_remove = idx.geo_radius_bitmap("loc", 40.71, -74.00, 10_000.0);
        assert!(!after_remove.contains(1));
    }

    #[test]
    fn match_phrase_requires_adjacency() {
        let idx = PayloadIndex::new();
        idx.index(1, &fields(&[("body", FilterValue::Str("the quick brown fox".into()))]));
        idx.index(2, &fields(&[("body", FilterValue::Str("quick and the fox is brown".into()))]));

        let phrase = idx.match_phrase_bitmap("body", "quick brown");
        assert!(phrase.contains(1));
        assert!(!phrase.contains(2));
    }

    #[test]
    fn geo_radius_finds_nearby_points() {
        let idx = PayloadIndex::new();
        idx.index_geo("loc", 1, GeoPoint { lat: 40.7128, lon: -74.0060 });
        idx.index_geo("loc", 2, GeoPoint { lat: 34.0522, lon: -118.2437 });

        let near_nyc = idx.geo_radius_bitmap("loc", 40.71, -74.00, 10_000.0);
        assert!(near_nyc.contains(1));
        assert!(!near_nyc.contains(2));
    }
}
