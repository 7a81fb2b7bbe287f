//! Boolean filter tree.
//!
//! Grounded on the teacher's `FilterExpr::{Match, Range}` two-leaf enum,
//! generalized into the full recursive `And`/`Or`/`Not` tree over typed
//! leaves the spec's filter engine needs. Evaluation (selectivity estimation,
//! plan ordering) lives in `vectordb-index`; this is the AST only.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Geo { lat: f64, lon: f64 },
}

impl FilterValue {
    /// Numeric view used by the ordered-range index; `None` for
    /// non-numeric values (string, bool, geo).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FilterValue::Int(n) => Some(*n as f64),
            FilterValue::Float(f) => Some(*f),
            FilterValue::Str(_) | FilterValue::Bool(_) | FilterValue::Geo { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterNode {
    Eq { key: String, value: FilterValue },
    Ne { key: String, value: FilterValue },
    Gt { key: String, value: FilterValue },
    Gte { key: String, value: FilterValue },
    Lt { key: String, value: FilterValue },
    Lte { key: String, value: FilterValue },
    Range { key: String, gte: Option<FilterValue>, lte: Option<FilterValue> },
    In { key: String, values: Vec<FilterValue> },
    NotIn { key: String, values: Vec<FilterValue> },
    GeoRadius { key: String, lat: f64, lon: f64, radius_m: f64 },
    GeoBbox { key: String, min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64 },
    MatchText { key: String, text: String },
    MatchPhrase { key: String, phrase: String },
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
}

impl FilterNode {
    pub fn and(nodes: Vec<FilterNode>) -> Self {
        FilterNode::And(nodes)
    }

    pub fn or(nodes: Vec<FilterNode>) -> Self {
        FilterNode::Or(nodes)
    }

    pub fn not(node: FilterNode) -> Self {
        FilterNode::Not(Box::new(node))
    }

    /// Leaf keys referenced anywhere in the tree, for a cheap "does this
    /// collection even have these fields indexed" pre-check.
    pub fn referenced_keys(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_keys(&mut out);
        out
    }

    fn collect_keys<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FilterNode::Eq { key, .. }
            | FilterNode::Ne { key, .. }
            | FilterNode::Gt { key, .. }
            | FilterNode::Gte { key, .. }
            | FilterNode::Lt { key, .. }
            | FilterNode::Lte { key, .. }
            | FilterNode::Range { key, .. }
            | FilterNode::In { key, .. }
            | FilterNode::NotIn { key, .. }
            | FilterNode::GeoRadius { key, .. }
            | FilterNode::GeoBbox { key, .. }
            | FilterNode::MatchText { key, .. }
            | FilterNode::MatchPhrase { key, .. } => out.push(key),
            FilterNode::And(nodes) | FilterNode::Or(nodes) => {
                for n in nodes {
                    n.collect_keys(out);
                }
            }
            FilterNode::Not(inner) => inner.collect_keys(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referenced_keys_walks_nested_tree() {
        let tree = FilterNode::and(vec![
            FilterNode::Eq { key: "status".into(), value: FilterValue::Str("live".into()) },
            FilterNode::not(FilterNode::Gt { key: "age".into(), value: FilterValue::Int(30) }),
        ]);
        let mut keys = tree.referenced_keys();
        keys.sort();
        assert_eq!(keys, vec!["age", "status"]);
    }
}
