use std::sync::Arc;

use vectordb_core::metric::EuclideanMetric;
use vectordb_core::{CollectionConfig, DenseVector, QuantizationMode};
use vectordb_index::HnswIndex;
use vectordb_store::VectorStore;

#[test]
fn graph_traversal_api_basics() {
    let dim = 8;
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = Arc::new(VectorStore::new(dir.path(), dim * 4));
    let config = Arc::new(CollectionConfig::new());
    config.set_m(32);
    config.set_ef_construction(120);

    let index = HnswIndex::new(storage, Arc::new(EuclideanMetric), dim, QuantizationMode::None, config);

    for i in 0..128u32 {
        let base = if i < 64 { 0.1 } else { 0.9 };
        let components: Vec<f32> = (0..dim).map(|j| base + j as f32 * 0.001).collect();
        let v = DenseVector::new(components);
        let id = index.insert_to_storage(&v).unwrap();
        index.index_node(id, &v).unwrap();
    }

    let neighbors = index.graph_neighbors(0, 0);
    assert!(!neighbors.is_empty(), "neighbors should not be empty");
    assert!(neighbors.len() <= 32 * 2);

    let traversed = index.graph_traverse(0, 2);
    assert!(!traversed.is_empty(), "traverse should return at least start node");
    assert_eq!(traversed[0], 0);

    // Every live node is reachable from the entry point at level 0
    // (graph connectivity, the testable property in the spec).
    let reachable = index.graph_traverse(index.entry_point(), 128);
    assert_eq!(reachable.len(), 128);

    let components = index.graph_connected_components();
    assert_eq!(components.len(), 1, "a densely connected graph should form one component");
}
