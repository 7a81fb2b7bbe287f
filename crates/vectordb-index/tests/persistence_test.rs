use std::fs::File;
use std::sync::Arc;

use vectordb_core::metric::EuclideanMetric;
use vectordb_core::{CancellationToken, CollectionConfig, DenseVector, QuantizationMode};
use vectordb_index::{HnswIndex, HnswSnapshot};
use vectordb_store::VectorStore;

fn build_index(dim: usize, quant: QuantizationMode) -> HnswIndex {
    let dir = tempfile::tempdir().unwrap();
    let element_size = match quant {
        QuantizationMode::None => dim * 4,
        QuantizationMode::ScalarI8 => dim + 4,
        QuantizationMode::Binary => (dim + 7) / 8 + 4,
    };
    let storage = Arc::new(VectorStore::new(dir.path(), element_size));
    let config = Arc::new(CollectionConfig::new());
    config.set_m(8);
    HnswIndex::new(storage, Arc::new(EuclideanMetric), dim, quant, config)
}

#[test]
fn index_save_load_round_trips_through_a_file() {
    let dim = 1;
    let index = build_index(dim, QuantizationMode::None);

    for v in [0.0f32, 1.0, 5.0, 9.0, 9.5] {
        let vec = DenseVector::new(vec![v]);
        let id = index.insert_to_storage(&vec).unwrap();
        index.index_node(id, &vec).unwrap();
    }
    index.delete(1);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.snap");
    {
        let mut file = File::create(&path).unwrap();
        HnswSnapshot::capture(&index).encode(&mut file).unwrap();
    }

    let loaded = {
        let mut file = File::open(&path).unwrap();
        HnswSnapshot::decode(&mut file).unwrap()
    };

    let restored = build_index(dim, QuantizationMode::None);
    for v in [0.0f32, 1.0, 5.0, 9.0, 9.5] {
        restored.insert_to_storage(&DenseVector::new(vec![v])).unwrap();
    }
    loaded.restore_into(&restored);

    assert_eq!(restored.count_deleted(), 1);
    let cancel = CancellationToken::new();
    let results = restored.search(&DenseVector::new(vec![9.4]), 1, 16, None, &cancel);
    assert_eq!(results[0].0, 4);
}

#[test]
fn quantized_index_round_trips() {
    let dim = 4;
    let index = build_index(dim, QuantizationMode::ScalarI8);
    for p in [[0.0f32, 0.0, 0.0, 0.0], [1.0, 1.0, 1.0, 1.0], [-1.0, -1.0, -1.0, -1.0]] {
        let v = DenseVector::new(p.to_vec());
        let id = index.insert_to_storage(&v).unwrap();
        index.index_node(id, &v).unwrap();
    }

    let snapshot = HnswSnapshot::capture(&index);
    let mut bytes = Vec::new();
    snapshot.encode(&mut bytes).unwrap();
    let decoded = HnswSnapshot::decode(&mut std::io::Cursor::new(bytes)).unwrap();
    assert_eq!(decoded.nodes.len(), 3);
}
