use std::sync::Arc;

use crate::error::{Error, InputError};

/// Which distance kernel a collection was created with. Stored on the
/// collection's metadata and never changed after creation (re-embedding under
/// a different metric is a reindex, not an update).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MetricKind {
    Cosine,
    Euclidean,
    Dot,
    Manhattan,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Cosine => "cosine",
            MetricKind::Euclidean => "euclidean",
            MetricKind::Dot => "dot",
            MetricKind::Manhattan => "manhattan",
        }
    }

    /// Build the concrete kernel for this metric. One allocation per
    /// collection, not per query: the HNSW graph holds the returned `Arc`
    /// for its whole lifetime and pays one indirect call per comparison.
    ///
    /// Runtime dispatch rather than the const-generic `Metric<const N: usize>`
    /// monomorphization this crate's ancestor used: `Collection::create` takes
    /// `dim` as a runtime argument, so there is no compile-time `N` to
    /// monomorphize over without an explosion of generated code per
    /// (dimension, metric) pair.
    pub fn build(self) -> Arc<dyn DistanceMetric> {
        match self {
            MetricKind::Cosine => Arc::new(CosineMetric),
            MetricKind::Euclidean => Arc::new(EuclideanMetric),
            MetricKind::Dot => Arc::new(DotMetric),
            MetricKind::Manhattan => Arc::new(ManhattanMetric),
        }
    }
}

/// A distance kernel over two equal-length f32 slices. Lower is closer.
///
/// Implementations must be branchless over vector content (no early-exit on
/// data values) so that search latency does not depend on which vectors are
/// compared, only on how many.
pub trait DistanceMetric: Send + Sync + 'static {
    fn kind(&self) -> MetricKind;

    /// Pre-flight check run once at insert time, not on every comparison.
    fn validate(&self, v: &[f32]) -> Result<(), Error> {
        if v.iter().any(|x| !x.is_finite()) {
            return Err(InputError::NonFiniteComponent.into());
        }
        Ok(())
    }

    /// Distance between two raw (unnormalized) vectors.
    fn distance(&self, a: &[f32], b: &[f32]) -> f32;

    /// Optional normalization applied once at insert time so that
    /// `distance()` can take a fast path. Cosine is the only metric that
    /// benefits; the rest are identity.
    fn normalize(&self, v: &mut [f32]) {
        let _ = v;
    }
}

#[inline]
fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt() as f32
}

pub struct CosineMetric;

impl DistanceMetric for CosineMetric {
    fn kind(&self) -> MetricKind {
        MetricKind::Cosine
    }

    fn validate(&self, v: &[f32]) -> Result<(), Error> {
        if v.iter().any(|x| !x.is_finite()) {
            return Err(InputError::NonFiniteComponent.into());
        }
        if norm(v) == 0.0 {
            return Err(InputError::ZeroNormVector.into());
        }
        Ok(())
    }

    fn normalize(&self, v: &mut [f32]) {
        let n = norm(v);
        if n > 0.0 {
            for x in v.iter_mut() {
                *x /= n;
            }
        }
    }

    /// Vectors are normalized at insert time, so this is just `1 - dot`,
    /// the fast path the teacher's `HyperVector` precomputed-`alpha` trick
    /// was reaching for, applied to an actually-normalizable metric.
    #[inline]
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
        (1.0 - dot) as f32
    }
}

pub struct EuclideanMetric;

impl DistanceMetric for EuclideanMetric {
    fn kind(&self) -> MetricKind {
        MetricKind::Euclidean
    }

    #[inline]
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        let sum_sq: f64 = a
            .iter()
            .zip(b)
            .map(|(x, y)| {
                let d = *x as f64 - *y as f64;
                d * d
            })
            .sum();
        sum_sq.sqrt() as f32
    }
}

pub struct DotMetric;

impl DistanceMetric for DotMetric {
    fn kind(&self) -> MetricKind {
        MetricKind::Dot
    }

    /// Negated so that "smaller is closer" holds uniformly across metrics;
    /// callers never need to special-case dot product's "bigger is closer".
    #[inline]
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
        -dot as f32
    }
}

pub struct ManhattanMetric;

impl DistanceMetric for ManhattanMetric {
    fn kind(&self) -> MetricKind {
        MetricKind::Manhattan
    }

    #[inline]
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn euclidean_matches_hand_computed() {
        let a = [1.0f32, 2.0, 3.0];
        let b = [4.0f32, 5.0, 6.0];
        let d = EuclideanMetric.distance(&a, &b);
        assert!((d - 27.0f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn cosine_orthogonal_unit_vectors_is_one() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        assert!((CosineMetric.distance(&a, &b) - 1.0).abs() < 1e-6);
        assert!(CosineMetric.distance(&a, &a).abs() < 1e-6);
    }

    #[test]
    fn cosine_rejects_zero_vector() {
        let z = [0.0f32, 0.0];
        assert!(CosineMetric.validate(&z).is_err());
    }

    #[test]
    fn dot_is_negated_so_smaller_is_closer() {
        let a = [1.0f32, 0.0];
        let b = [2.0f32, 0.0];
        let c = [0.5f32, 0.0];
        // b is "more similar" by raw dot product, so its negated distance is smaller.
        assert!(DotMetric.distance(&a, &b) < DotMetric.distance(&a, &c));
    }

    #[test]
    fn manhattan_matches_hand_computed() {
        let a = [1.0f32, -2.0, 3.0];
        let b = [0.0f32, 0.0, 0.0];
        assert!((ManhattanMetric.distance(&a, &b) - 6.0).abs() < 1e-6);
    }
}
