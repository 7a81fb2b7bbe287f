//! Anti-entropy digest over a pruned author's log, letting a receiver that
//! missed a pruned window catch up via snapshot-plus-tail instead of
//! replaying the full history. Bucketing by vertex id mirrors the
//! collection layer's `CollectionDigest` bucketing of vector ids.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::vertex::VertexId;

pub const DIGEST_BUCKETS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDigest {
    pub author_vertex_count: usize,
    pub state_hash: u64,
    pub buckets: Vec<u64>,
}

impl LogDigest {
    /// Builds a digest over `finalized_ids`, the ids of every finalized
    /// vertex authored by one node. A receiver missing none of these will
    /// compute the identical digest; any mismatch localizes to the
    /// differing buckets instead of forcing a full resend.
    pub fn build(finalized_ids: &[VertexId]) -> Self {
        let mut buckets = vec![0u64; DIGEST_BUCKETS];
        for id in finalized_ids {
            let idx = bucket_index(id);
            buckets[idx] ^= hash_vertex(id);
        }
        let mut state_hash = 0u64;
        for b in &buckets {
            state_hash ^= b;
        }
        Self { author_vertex_count: finalized_ids.len(), state_hash, buckets }
    }

    /// Buckets that differ between `self` (the sender's view) and
    /// `other` (the receiver's), meaning the receiver should request the
    /// tail covering those buckets.
    pub fn diverging_buckets(&self, other: &LogDigest) -> Vec<usize> {
        self.buckets
            .iter()
            .zip(other.buckets.iter())
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn matches(&self, other: &LogDigest) -> bool {
        self.state_hash == other.state_hash
    }
}

fn bucket_index(id: &VertexId) -> usize {
    (id[0] as usize) % DIGEST_BUCKETS
}

fn hash_vertex(id: &VertexId) -> u64 {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_sets_produce_identical_digests() {
        let ids: Vec<VertexId> = (0u8..10).map(|i| [i; 32]).collect();
        let a = LogDigest::build(&ids);
        let b = LogDigest::build(&ids);
        assert!(a.matches(&b));
        assert!(a.diverging_buckets(&b).is_empty());
    }

    #[test]
    fn missing_one_vertex_localizes_to_few_buckets() {
        let mut ids: Vec<VertexId> = (0u8..50).map(|i| [i; 32]).collect();
        let full = LogDigest::build(&ids);
        ids.pop();
        let partial = LogDigest::build(&ids);
        assert!(!full.matches(&partial));
        assert!(!full.diverging_buckets(&partial).is_empty());
        assert!(full.diverging_buckets(&partial).len() < DIGEST_BUCKETS);
    }
}
