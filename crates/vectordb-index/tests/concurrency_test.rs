//! Readers (search) run concurrently with a single writer thread doing
//! sequential inserts and deletes; per the concurrency model (readers may
//! proceed in parallel with at most one concurrent writer and never
//! observe a torn neighbor list), no reader should panic or see a result
//! set larger than what the writer has committed so far.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use vectordb_core::metric::EuclideanMetric;
use vectordb_core::{CancellationToken, CollectionConfig, DenseVector, QuantizationMode};
use vectordb_index::HnswIndex;
use vectordb_store::VectorStore;

#[test]
fn concurrent_readers_survive_writer_churn() {
    let dim = 4;
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(VectorStore::new(dir.path(), dim * 4));
    let config = Arc::new(CollectionConfig::new());
    config.set_m(8);
    config.set_ef_construction(64);
    let index = Arc::new(HnswIndex::new(
        storage,
        Arc::new(EuclideanMetric),
        dim,
        QuantizationMode::None,
        config,
    ));

    let total_items = 2000usize;
    let done = Arc::new(AtomicBool::new(false));

    let reader_handles: Vec<_> = (0..4)
        .map(|_| {
            let index = index.clone();
            let done = done.clone();
            thread::spawn(move || {
                let cancel = CancellationToken::new();
                while !done.load(Ordering::Relaxed) {
                    let query = DenseVector::new(vec![0.5; dim]);
                    let results = index.search(&query, 5, 32, None, &cancel);
                    assert!(results.len() <= 5);
                    for (id, dist) in &results {
                        assert!(dist.is_finite());
                        assert!(*id < index.count_nodes() as u32);
                    }
                }
            })
        })
        .collect();

    let writer_index = index.clone();
    for i in 0..total_items {
        let v = DenseVector::new(vec![(i % 97) as f32 * 0.01; dim]);
        let id = writer_index.insert_to_storage(&v).unwrap();
        writer_index.index_node(id, &v).unwrap();
        if i % 50 == 0 && i > 0 {
            writer_index.delete((i - 50) as u32);
        }
    }

    done.store(true, Ordering::Relaxed);
    for h in reader_handles {
        h.join().unwrap();
    }

    assert_eq!(index.count_nodes(), total_items);
}
