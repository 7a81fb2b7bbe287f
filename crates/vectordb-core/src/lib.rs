use std::collections::HashMap;

pub mod cancel;
pub mod config;
pub mod error;
pub mod filter;
pub mod metric;
pub mod vector;

pub use cancel::CancellationToken;
pub use config::CollectionConfig;
pub use error::{CapacityError, CoordinationError, Error, ErrorKind, InputError, Result, StateError};
pub use filter::{FilterNode, FilterValue};
pub use metric::{CosineMetric, DistanceMetric, DotMetric, EuclideanMetric, ManhattanMetric, MetricKind};
pub use vector::{BinaryVector, DenseVector, QuantizationMode, ScalarI8Vector};

/// Dense internal handle into a collection's vector store: a small, stable,
/// reused-after-compaction integer. Never exposed across the network layer
/// (out of scope here); callers address vectors by their external id.
pub type InternalId = u32;

/// Caller-supplied external identifier for a vector, unique within a
/// collection for the lifetime of that external id (it may be reinserted
/// after a delete, which allocates a fresh `InternalId`).
pub type ExternalId = String;

#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub top_k: usize,
    pub ef_search: Option<usize>,
    pub filter: Option<FilterNode>,
    /// Whether the caller wants each hit's stored payload hydrated back.
    /// Off by default since most callers only need id/score.
    pub with_payload: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchHit {
    pub external_id: ExternalId,
    pub distance: f32,
    pub payload: Option<HashMap<String, FilterValue>>,
}

/// Result of a query-pipeline search: the hits it managed to fill, plus a
/// flag raised when the pipeline still came up short of `top_k` after the
/// hybrid fallback (spec's "never silently returns fewer than k results").
#[derive(Debug, Default)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub recall_warning: Option<CapacityError>,
}
