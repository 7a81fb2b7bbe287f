use std::sync::Arc;

use proptest::prelude::*;
use tempfile::tempdir;

use vectordb_core::metric::EuclideanMetric;
use vectordb_core::{CancellationToken, CollectionConfig, DenseVector, QuantizationMode};
use vectordb_index::HnswIndex;
use vectordb_store::VectorStore;

const D: usize = 4;

fn arb_vector() -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-100.0f32..100.0, D)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn inserted_vectors_are_their_own_nearest_neighbor(
        vectors in proptest::collection::vec(arb_vector(), 20..50)
    ) {
        let dir = tempdir().unwrap();
        let store = Arc::new(VectorStore::new(dir.path(), D * 4));
        let config = Arc::new(CollectionConfig::new());
        config.set_ef_construction(200);
        config.set_ef_search(200);

        let index = HnswIndex::new(store, Arc::new(EuclideanMetric), D, QuantizationMode::None, config);

        for (i, coords) in vectors.iter().enumerate() {
            let v = DenseVector::new(coords.clone());
            let id = index.insert_to_storage(&v).unwrap();
            prop_assert_eq!(id, u32::try_from(i).unwrap());
            index.index_node(id, &v).unwrap();
        }

        let cancel = CancellationToken::new();
        for coords in &vectors {
            let v = DenseVector::new(coords.clone());
            let results = index.search(&v, 1, 200, None, &cancel);
            prop_assert!(!results.is_empty(), "inserted vector not found");
            prop_assert!(results[0].1 < 1e-3, "nearest distance was {}", results[0].1);
        }
    }
}
