use parking_lot::RwLock;
use roaring::RoaringBitmap;

/// Deleted-handle set shared between the vector store and the HNSW graph:
/// a handle present here is skipped during traversal and excluded from
/// compaction's live set. Grounded on `hyperspace_index::MetadataIndex`'s
/// own `RwLock<RoaringBitmap>` deleted-set field.
#[derive(Debug, Default)]
pub struct TombstoneSet {
    bits: RwLock<RoaringBitmap>,
}

impl TombstoneSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, id: u32) {
        self.bits.write().insert(id);
    }

    pub fn is_tombstoned(&self, id: u32) -> bool {
        self.bits.read().contains(id)
    }

    pub fn len(&self) -> u64 {
        self.bits.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ratio of tombstoned handles to `total`, used to decide whether a
    /// compaction pass is due.
    pub fn ratio(&self, total: usize) -> f64 {
        if total == 0 {
            return 0.0;
        }
        self.len() as f64 / total as f64
    }

    pub fn snapshot(&self) -> RoaringBitmap {
        self.bits.read().clone()
    }

    pub fn clear(&self) {
        self.bits.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_and_queries() {
        let t = TombstoneSet::new();
        assert!(!t.is_tombstoned(5));
        t.mark(5);
        assert!(t.is_tombstoned(5));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn ratio_is_fraction_of_total() {
        let t = TombstoneSet::new();
        for i in 0..10 {
            t.mark(i);
        }
        assert!((t.ratio(100) - 0.1).abs() < 1e-9);
    }
}
