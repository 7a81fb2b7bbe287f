//! Per-collection anti-entropy digest over live vectors, grounded on the
//! teacher's `sync::CollectionDigest`: a fixed bucket count XOR-folded per
//! entry, then XOR-folded once more into a single root hash so two replicas
//! can compare one u64 before falling back to per-bucket diffing.
//!
//! Adapted from the teacher's `&[f64]` signature to this workspace's `f32`
//! component representation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub const SYNC_BUCKETS: usize = 256;

pub fn bucket_index(id: u32) -> usize {
    (id as usize) % SYNC_BUCKETS
}

pub fn hash_entry(id: u32, components: &[f32]) -> u64 {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    for c in components {
        c.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}

pub fn state_hash(buckets: &[u64]) -> u64 {
    buckets.iter().fold(0u64, |acc, b| acc ^ b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_entry_hashes_identically() {
        let a = hash_entry(3, &[1.0, 2.0, 3.0]);
        let b = hash_entry(3, &[1.0, 2.0, 3.0]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_components_hash_differently() {
        let a = hash_entry(3, &[1.0, 2.0, 3.0]);
        let b = hash_entry(3, &[1.0, 2.0, 3.1]);
        assert_ne!(a, b);
    }
}
